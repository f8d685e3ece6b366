//! PV-017: systemd unit for the backend. Render, write, activate.

use crate::core::config::{self, HostPaths, SERVICE_NAME};
use crate::core::error::ProvisionError;
use crate::core::types::{ArtifactChange, InstallPlan, ServiceUnitSpec};
use crate::resources::file;
use crate::transport::{exec_checked, quote, Transport};

pub const UNIT_MODE: u32 = 0o644;

/// Unit description for this plan.
pub fn unit_spec(plan: &InstallPlan) -> ServiceUnitSpec {
    let python = plan.venv_python().to_string_lossy().to_string();
    ServiceUnitSpec {
        description: "M365 Monitor backend".to_string(),
        user: plan.user.clone(),
        working_dir: plan.backend_dir(),
        env_file: plan.env_file.clone(),
        exec_start: vec![
            python,
            "-m".to_string(),
            "uvicorn".to_string(),
            config::ASGI_APP.to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            plan.port.to_string(),
        ],
        restart: "on-failure".to_string(),
        restart_sec: config::RESTART_SEC,
    }
}

/// Render the unit file.
///
/// No `Group=`: systemd then uses the account's primary group, the same one
/// `chown user:` assigns to the installed tree.
pub fn render_unit(spec: &ServiceUnitSpec) -> String {
    format!(
        "[Unit]\n\
         Description={description}\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         User={user}\n\
         WorkingDirectory={working_dir}\n\
         EnvironmentFile={env_file}\n\
         ExecStart={exec_start}\n\
         Restart={restart}\n\
         RestartSec={restart_sec}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        description = spec.description,
        user = spec.user,
        working_dir = spec.working_dir.display(),
        env_file = spec.env_file.display(),
        exec_start = spec.exec_start.join(" "),
        restart = spec.restart,
        restart_sec = spec.restart_sec,
    )
}

/// Shell that reloads units, enables and restarts the service, then checks it.
pub fn activate_script() -> String {
    let name = quote(SERVICE_NAME);
    format!(
        "set -euo pipefail\n\
         systemctl daemon-reload\n\
         systemctl enable {name}\n\
         systemctl restart {name}\n\
         systemctl is-active --quiet {name}"
    )
}

/// Shell that collects diagnostics after a failed activation.
pub fn status_script() -> String {
    format!("systemctl status {} --no-pager", quote(SERVICE_NAME))
}

/// Write the unit and (re)start the service.
pub fn publish(
    plan: &InstallPlan,
    paths: &HostPaths,
    transport: &dyn Transport,
) -> Result<ArtifactChange, ProvisionError> {
    let content = render_unit(&unit_spec(plan));
    let change = file::write_artifact("unit", &paths.unit_file(), &content, UNIT_MODE)
        .map_err(ProvisionError::runtime)?;

    if let Err(e) = exec_checked(transport, &activate_script()) {
        let status = match transport.exec(&status_script()) {
            Ok(out) => format!("{}{}", out.stdout, out.stderr).trim().to_string(),
            Err(err) => err,
        };
        return Err(ProvisionError::runtime(format!(
            "service {} failed to start: {}\n{}",
            SERVICE_NAME, e, status
        )));
    }
    Ok(change)
}
