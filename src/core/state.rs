//! PV-013: State lock management. Load, merge and atomic save.

use super::config::SERVICE_NAME;
use super::types::{ArtifactChange, ArtifactLock, StateLock};
use crate::tripwire::eventlog::now_iso8601;
use std::path::{Path, PathBuf};

/// Derive the lock file path within the state directory.
pub fn lock_file_path(state_dir: &Path) -> PathBuf {
    state_dir.join("state.lock.yaml")
}

/// Load the lock. Returns None if it doesn't exist.
pub fn load_lock(state_dir: &Path) -> Result<Option<StateLock>, String> {
    let path = lock_file_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save the lock atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), String> {
    let path = lock_file_path(state_dir);
    std::fs::create_dir_all(state_dir)
        .map_err(|e| format!("cannot create dir {}: {}", state_dir.display(), e))?;

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Create a new empty lock for a run.
pub fn new_lock(run_id: &str) -> StateLock {
    StateLock {
        schema: "1.0".to_string(),
        service: SERVICE_NAME.to_string(),
        generated_at: now_iso8601(),
        generator: format!("m365-provision {}", env!("CARGO_PKG_VERSION")),
        run_id: run_id.to_string(),
        completed: false,
        artifacts: indexmap::IndexMap::new(),
    }
}

/// Fold this run's artifacts into the previous lock.
///
/// Entries from earlier runs that this run did not touch are kept, so a run
/// that aborts halfway still leaves the earlier hashes in place.
pub fn merge_run(
    previous: Option<StateLock>,
    run_id: &str,
    changes: &[ArtifactChange],
    completed: bool,
) -> StateLock {
    let mut lock = previous.unwrap_or_else(|| new_lock(run_id));
    lock.run_id = run_id.to_string();
    lock.generated_at = now_iso8601();
    lock.generator = format!("m365-provision {}", env!("CARGO_PKG_VERSION"));
    lock.completed = completed;
    for change in changes {
        lock.artifacts.insert(
            change.artifact.clone(),
            ArtifactLock {
                path: change.path.to_string_lossy().to_string(),
                hash: change.hash.clone(),
                applied_at: Some(lock.generated_at.clone()),
            },
        );
    }
    lock
}

/// Drop entries a completed stage owns but did not produce this run.
///
/// A proxy layout switch from `sites-enabled/` to `conf.d/` stops producing
/// `nginx-link`; keeping it would report drift on a converged host.
pub fn retire_unproduced(lock: &mut StateLock, owned: &[&str], changes: &[ArtifactChange]) {
    lock.artifacts.retain(|name, _| {
        !owned.contains(&name.as_str()) || changes.iter().any(|c| &c.artifact == name)
    });
}
