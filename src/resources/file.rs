//! PV-007: Artifact files. Hash-compared atomic writes, links, ownership.

use crate::core::types::{ArtifactChange, PlanAction};
use crate::transport::quote;
use crate::tripwire::hasher;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// What writing `content` to `path` would do.
pub fn plan_content(path: &Path, content: &str) -> PlanAction {
    if !path.exists() {
        return PlanAction::Create;
    }
    match hasher::hash_file(path) {
        Ok(existing) if existing == hasher::hash_string(content) => PlanAction::NoOp,
        _ => PlanAction::Update,
    }
}

/// Converge a file to exactly `content` with `mode`.
///
/// Unchanged content is left untouched apart from the mode. Changed content is
/// written to a sibling temp file, chmod-ed, then renamed over the target, so
/// the target never exists with partial content or looser permissions.
pub fn write_artifact(
    artifact: &str,
    path: &Path,
    content: &str,
    mode: u32,
) -> Result<ArtifactChange, String> {
    let action = plan_content(path, content);
    let hash = hasher::hash_string(content);

    if action != PlanAction::NoOp {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
        }
        let file_name = path
            .file_name()
            .ok_or_else(|| format!("not a file path: {}", path.display()))?;
        let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
        let mut tmp = open_temp(&tmp_path, mode)?;
        tmp.write_all(content.as_bytes())
            .and_then(|_| tmp.sync_all())
            .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
        drop(tmp);
        set_mode(&tmp_path, mode)?;
        std::fs::rename(&tmp_path, path).map_err(|e| {
            format!(
                "cannot rename {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            )
        })?;
    }
    set_mode(path, mode)?;

    Ok(ArtifactChange {
        artifact: artifact.to_string(),
        path: path.to_path_buf(),
        action,
        hash,
    })
}

/// Create a fresh temp file that is born with at most `mode`.
///
/// A leftover temp from an interrupted run is removed first; `create_new`
/// refuses to reuse whatever is at the path.
pub(crate) fn open_temp(path: &Path, mode: u32) -> Result<File, String> {
    if path.symlink_metadata().is_ok() {
        std::fs::remove_file(path)
            .map_err(|e| format!("cannot remove stale {}: {}", path.display(), e))?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .map_err(|e| format!("cannot create {}: {}", path.display(), e))
}

/// Set permission bits on a path.
pub fn set_mode(path: &Path, mode: u32) -> Result<(), String> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| format!("cannot chmod {:o} {}: {}", mode, path.display(), e))
}

/// What pointing `link` at `target` would do.
pub fn plan_symlink(link: &Path, target: &Path) -> PlanAction {
    match std::fs::read_link(link) {
        Ok(current) if current == target => PlanAction::NoOp,
        Ok(_) => PlanAction::Update,
        Err(_) if link.symlink_metadata().is_ok() => PlanAction::Update,
        Err(_) => PlanAction::Create,
    }
}

/// Point `link` at `target`, replacing a stale link or file.
///
/// The returned change hashes the link target so drift checks can compare it.
pub fn ensure_symlink(artifact: &str, link: &Path, target: &Path) -> Result<ArtifactChange, String> {
    let hash = hasher::hash_string(&target.to_string_lossy());
    let action = plan_symlink(link, target);

    if action != PlanAction::NoOp {
        if action == PlanAction::Update {
            std::fs::remove_file(link)
                .map_err(|e| format!("cannot remove {}: {}", link.display(), e))?;
        }
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
        }
        std::os::unix::fs::symlink(target, link).map_err(|e| {
            format!(
                "cannot link {} → {}: {}",
                link.display(),
                target.display(),
                e
            )
        })?;
    }

    Ok(ArtifactChange {
        artifact: artifact.to_string(),
        path: link.to_path_buf(),
        action,
        hash,
    })
}

/// Generate shell to set ownership. `group: None` uses the owner's login group.
pub fn chown_script(owner: &str, group: Option<&str>, path: &Path, recursive: bool) -> String {
    let spec = match group {
        Some(g) => format!("{}:{}", quote(owner), quote(g)),
        None => format!("{}:", quote(owner)),
    };
    let flag = if recursive { "-R " } else { "" };
    format!(
        "set -euo pipefail\nchown {}{} {}",
        flag,
        spec,
        quote(&path.to_string_lossy())
    )
}
