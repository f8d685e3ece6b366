//! PV-006: Host capability probe. Detect the package manager and
//! soft-install missing tools.
//!
//! Nothing here is fatal. A tool that stays missing only matters when a later
//! stage needs it, and that stage reports the failure with its own kind.

use super::types::{InstallPlan, PackageManagerKind, Tool};
use crate::resources::package::{manager_for, PROBE_ORDER};
use crate::transport::Transport;

/// What the probe found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub manager: PackageManagerKind,
    /// Tools that were missing and are now installed
    pub installed: Vec<Tool>,
    /// Tools still missing, with the reason
    pub soft_failures: Vec<(Tool, String)>,
}

impl ProbeReport {
    pub fn detail(&self) -> String {
        let mut parts = vec![format!("package manager: {}", self.manager)];
        if !self.installed.is_empty() {
            let names: Vec<String> = self.installed.iter().map(Tool::to_string).collect();
            parts.push(format!("installed: {}", names.join(", ")));
        }
        if !self.soft_failures.is_empty() {
            let names: Vec<String> = self.soft_failures.iter().map(|(t, _)| t.to_string()).collect();
            parts.push(format!("missing: {}", names.join(", ")));
        }
        parts.join("; ")
    }
}

/// First package manager found on the host, by priority.
pub fn detect_manager(transport: &dyn Transport) -> PackageManagerKind {
    PROBE_ORDER
        .iter()
        .find(|(bin, _)| transport.has_command(bin))
        .map(|(_, kind)| *kind)
        .unwrap_or(PackageManagerKind::None)
}

/// Tools this plan needs, in install order.
pub fn required_tools(plan: &InstallPlan) -> Vec<Tool> {
    let mut tools = vec![Tool::Python, Tool::Venv, Tool::Pip];
    if plan.with_nginx {
        tools.push(Tool::Nginx);
    }
    tools
}

/// Whether `tool` is usable on the host right now.
pub fn tool_present(transport: &dyn Transport, tool: Tool) -> bool {
    let probe = |script: &str| matches!(transport.exec(script), Ok(out) if out.success());
    match tool {
        Tool::Python => transport.has_command("python3"),
        Tool::Venv => probe("python3 -c 'import venv, ensurepip'"),
        Tool::Pip => probe("python3 -m pip --version"),
        Tool::Nginx => transport.has_command("nginx"),
    }
}

/// Probe the host. With `install` false nothing is installed and every
/// missing tool is reported as a soft failure.
pub fn probe(plan: &InstallPlan, transport: &dyn Transport, install: bool) -> ProbeReport {
    let kind = detect_manager(transport);
    let manager = manager_for(kind);
    let mut report = ProbeReport {
        manager: kind,
        installed: Vec::new(),
        soft_failures: Vec::new(),
    };

    for tool in required_tools(plan) {
        if tool_present(transport, tool) {
            continue;
        }
        if !install {
            report
                .soft_failures
                .push((tool, format!("{} not found", tool)));
            continue;
        }
        tracing::info!(%tool, manager = %kind, "installing missing tool");
        match manager.ensure_installed(transport, tool) {
            Ok(()) => report.installed.push(tool),
            Err(e) => {
                tracing::warn!(%tool, error = %e, "could not install tool");
                report.soft_failures.push((tool, e));
            }
        }
    }
    report
}
