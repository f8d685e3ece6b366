//! PV-016: Drift detection. Compare live artifacts to the state lock.

use crate::core::types::StateLock;
use crate::tripwire::hasher;
use std::path::Path;

/// A single drift finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftFinding {
    pub artifact: String,
    pub path: String,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

/// Check one artifact file against its recorded hash.
pub fn check_artifact(artifact: &str, path: &str, expected_hash: &str) -> Option<DriftFinding> {
    let file_path = Path::new(path);
    if !file_path.exists() {
        return Some(DriftFinding {
            artifact: artifact.to_string(),
            path: path.to_string(),
            expected_hash: expected_hash.to_string(),
            actual_hash: "MISSING".to_string(),
            detail: format!("{} does not exist", path),
        });
    }

    // Activation links are recorded by target, not content.
    let actual = if file_path.is_symlink() {
        match std::fs::read_link(file_path) {
            Ok(target) => hasher::hash_string(&target.to_string_lossy()),
            Err(e) => format!("ERROR:{}", e),
        }
    } else {
        hasher::hash_file(file_path).unwrap_or_else(|e| format!("ERROR:{}", e))
    };

    if actual == expected_hash {
        return None;
    }
    Some(DriftFinding {
        artifact: artifact.to_string(),
        path: path.to_string(),
        expected_hash: expected_hash.to_string(),
        actual_hash: actual,
        detail: format!("{} changed outside provisioning", path),
    })
}

/// Check every artifact in a lock.
pub fn detect_drift(lock: &StateLock) -> Vec<DriftFinding> {
    lock.artifacts
        .iter()
        .filter_map(|(name, al)| check_artifact(name, &al.path, &al.hash))
        .collect()
}
