//! PV-011: Local execution transport.

use super::{ExecOutput, Transport};
use std::io::Write;
use std::process::{Command, Stdio};

/// Runs scripts on the machine the orchestrator itself runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn exec(&self, script: &str) -> Result<ExecOutput, String> {
        tracing::debug!(script, "exec");
        exec_local(script)
    }

    fn has_command(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

/// Execute a shell script locally via `bash` fed on stdin.
/// Uses bash (not sh/dash) because generated scripts use `set -o pipefail`.
/// The locale is pinned so tool output stays parseable.
pub fn exec_local(script: &str) -> Result<ExecOutput, String> {
    let mut child = Command::new("bash")
        .env("LC_ALL", "C")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
