//! PV-019: Project materializer. Mirror `backend/` and `frontend/` into the
//! install root and hand it to the run identity.

use crate::core::config::{BACKEND_DIR, FRONTEND_DIR};
use crate::core::error::ProvisionError;
use crate::core::types::InstallPlan;
use crate::resources::file::chown_script;
use crate::transport::{exec_checked, quote, user_exists, Transport};
use crate::tripwire::hasher;
use std::path::Path;

const SUBTREES: [&str; 2] = [BACKEND_DIR, FRONTEND_DIR];

/// How the subtrees get copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    /// `rsync -a --delete`, removes files gone from the source
    Mirror,
    /// delete the destination subtree, then `cp -a`
    Replace,
    /// source root is the install root
    Skipped,
}

/// Outcome of materializing the project.
#[derive(Debug, Clone)]
pub struct MaterializeReport {
    pub method: SyncMethod,
    pub tree_before: Option<String>,
    pub tree_after: Option<String>,
    pub warnings: Vec<String>,
}

impl MaterializeReport {
    pub fn changed(&self) -> bool {
        self.tree_before != self.tree_after
    }

    pub fn detail(&self) -> String {
        let how = match self.method {
            SyncMethod::Mirror => "rsync",
            SyncMethod::Replace => "cp",
            SyncMethod::Skipped => "in place",
        };
        let what = if self.changed() { "changed" } else { "unchanged" };
        format!("{} ({})", what, how)
    }
}

/// Shell that copies one subtree from `src` to `dst`.
pub fn sync_script(method: SyncMethod, src: &Path, dst: &Path, subtree: &str) -> String {
    let from = src.join(subtree);
    let to = dst.join(subtree);
    match method {
        SyncMethod::Mirror => format!(
            "set -euo pipefail\n\
             mkdir -p {to}\n\
             rsync -a --delete {from}/ {to}/",
            from = quote(&from.to_string_lossy()),
            to = quote(&to.to_string_lossy()),
        ),
        SyncMethod::Replace => format!(
            "set -euo pipefail\n\
             mkdir -p {dst}\n\
             rm -rf {to}\n\
             cp -a {from} {to}",
            dst = quote(&dst.to_string_lossy()),
            from = quote(&from.to_string_lossy()),
            to = quote(&to.to_string_lossy()),
        ),
        SyncMethod::Skipped => String::new(),
    }
}

/// Pick the copy method for this host.
pub fn sync_method(plan: &InstallPlan, transport: &dyn Transport) -> SyncMethod {
    if same_dir(&plan.src, &plan.app_dir) {
        SyncMethod::Skipped
    } else if transport.has_command("rsync") {
        SyncMethod::Mirror
    } else {
        SyncMethod::Replace
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Copy the project into the install root and set its ownership.
pub fn materialize(
    plan: &InstallPlan,
    transport: &dyn Transport,
) -> Result<MaterializeReport, ProvisionError> {
    let tree_before = hasher::hash_tree(&plan.app_dir, &SUBTREES).map_err(ProvisionError::runtime)?;
    let method = sync_method(plan, transport);

    if method != SyncMethod::Skipped {
        for subtree in SUBTREES {
            let script = sync_script(method, &plan.src, &plan.app_dir, subtree);
            exec_checked(transport, &script).map_err(|e| {
                ProvisionError::runtime(format!(
                    "syncing {} into {} failed: {}",
                    subtree,
                    plan.app_dir.display(),
                    e
                ))
            })?;
        }
    }

    let mut warnings = Vec::new();
    if user_exists(transport, &plan.user) {
        exec_checked(transport, &chown_script(&plan.user, None, &plan.app_dir, true)).map_err(
            |e| ProvisionError::runtime(format!("chown {}: {}", plan.app_dir.display(), e)),
        )?;
    } else {
        warnings.push(format!(
            "user '{}' does not exist; leaving ownership of {} unchanged",
            plan.user,
            plan.app_dir.display()
        ));
    }

    let tree_after = hasher::hash_tree(&plan.app_dir, &SUBTREES).map_err(ProvisionError::runtime)?;
    Ok(MaterializeReport {
        method,
        tree_before,
        tree_after,
        warnings,
    })
}
