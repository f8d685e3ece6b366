//! PV-020: Python runtime. Virtual environment plus the backend's
//! dependencies.

use crate::core::error::ProvisionError;
use crate::core::types::InstallPlan;
use crate::transport::{exec_checked, quote, user_exists, Transport};

/// Outcome of provisioning the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeReport {
    pub venv_created: bool,
}

impl RuntimeReport {
    pub fn detail(&self) -> String {
        if self.venv_created {
            "venv created, requirements installed".to_string()
        } else {
            "venv present, requirements installed".to_string()
        }
    }
}

/// Shell that creates the venv, as the run identity when it can.
pub fn venv_script(plan: &InstallPlan, as_user: bool) -> String {
    let venv = quote(&plan.venv_dir().to_string_lossy());
    if as_user && plan.user != "root" {
        format!(
            "set -euo pipefail\nrunuser -u {} -- python3 -m venv {}",
            quote(&plan.user),
            venv
        )
    } else {
        format!("set -euo pipefail\npython3 -m venv {}", venv)
    }
}

/// Shell that upgrades pip and installs the manifest into the venv.
pub fn install_script(plan: &InstallPlan) -> String {
    let python = quote(&plan.venv_python().to_string_lossy());
    format!(
        "set -euo pipefail\n\
         {python} -m pip install --quiet --upgrade pip\n\
         {python} -m pip install --quiet --upgrade -r {manifest}",
        manifest = quote(&plan.manifest().to_string_lossy()),
    )
}

/// Create the venv if needed and install the backend's requirements.
pub fn provision(plan: &InstallPlan, transport: &dyn Transport) -> Result<RuntimeReport, ProvisionError> {
    let python = plan.venv_python();
    let venv_created = !python.exists();

    if venv_created {
        let as_user = user_exists(transport, &plan.user);
        let created = exec_checked(transport, &venv_script(plan, as_user));
        if !python.exists() {
            let cause = created.err().unwrap_or_else(|| "interpreter not created".to_string());
            return Err(ProvisionError::runtime(format!(
                "cannot create virtual environment at {} ({}); install python3-venv \
                 (apt-get) or python3 (dnf/yum) and re-run",
                plan.venv_dir().display(),
                cause
            )));
        }
    }

    exec_checked(transport, &install_script(plan)).map_err(|e| {
        ProvisionError::runtime(format!(
            "installing {} failed: {}",
            plan.manifest().display(),
            e
        ))
    })?;

    Ok(RuntimeReport { venv_created })
}
