//! PV-009: Package manager capability (apt-get, dnf, yum, none).
//!
//! The prober picks one variant by priority; every stage that needs a
//! missing system package goes through the same `ensure_installed` call.

use crate::core::types::{PackageManagerKind, Tool};
use crate::transport::{exec_checked, quote, Transport};

/// Binaries probed, in priority order.
pub const PROBE_ORDER: [(&str, PackageManagerKind); 3] = [
    ("apt-get", PackageManagerKind::Apt),
    ("dnf", PackageManagerKind::Dnf),
    ("yum", PackageManagerKind::Yum),
];

/// Uniform "install this system package" capability.
pub trait PackageManager {
    fn kind(&self) -> PackageManagerKind;

    /// Distribution package that provides `tool`.
    fn package_for(&self, tool: Tool) -> &'static str;

    /// Idempotent install script, or None when nothing can install packages.
    fn install_script(&self, package: &str) -> Option<String>;

    /// Install the package providing `tool`.
    fn ensure_installed(&self, transport: &dyn Transport, tool: Tool) -> Result<(), String> {
        let package = self.package_for(tool);
        let script = self.install_script(package).ok_or_else(|| {
            format!(
                "no supported package manager found; install '{}' manually",
                package
            )
        })?;
        exec_checked(transport, &script)
            .map(|_| ())
            .map_err(|e| format!("{} install {} failed: {}", self.kind(), package, e))
    }
}

/// Debian / Ubuntu.
pub struct Apt;

/// Fedora / RHEL 8+.
pub struct Dnf;

/// RHEL 7 / CentOS 7.
pub struct Yum;

/// No supported manager on the host.
pub struct NoManager;

fn rpm_package(tool: Tool) -> &'static str {
    match tool {
        // venv ships with the interpreter on RPM distributions
        Tool::Python | Tool::Venv => "python3",
        Tool::Pip => "python3-pip",
        Tool::Nginx => "nginx",
    }
}

fn rpm_install(manager: &str, package: &str) -> String {
    let pkg = quote(package);
    format!(
        "set -euo pipefail\n\
         if ! rpm -q {pkg} >/dev/null 2>&1; then\n\
           {manager} install -y -q {pkg}\n\
         fi\n\
         rpm -q {pkg} >/dev/null"
    )
}

impl PackageManager for Apt {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apt
    }

    fn package_for(&self, tool: Tool) -> &'static str {
        match tool {
            Tool::Python => "python3",
            Tool::Venv => "python3-venv",
            Tool::Pip => "python3-pip",
            Tool::Nginx => "nginx",
        }
    }

    fn install_script(&self, package: &str) -> Option<String> {
        let pkg = quote(package);
        Some(format!(
            "set -euo pipefail\n\
             if ! dpkg -s {pkg} >/dev/null 2>&1; then\n\
               apt-get update -qq\n\
               DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {pkg}\n\
             fi\n\
             # Postcondition: package installed\n\
             dpkg -s {pkg} >/dev/null 2>&1"
        ))
    }
}

impl PackageManager for Dnf {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Dnf
    }

    fn package_for(&self, tool: Tool) -> &'static str {
        rpm_package(tool)
    }

    fn install_script(&self, package: &str) -> Option<String> {
        Some(rpm_install("dnf", package))
    }
}

impl PackageManager for Yum {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Yum
    }

    fn package_for(&self, tool: Tool) -> &'static str {
        rpm_package(tool)
    }

    fn install_script(&self, package: &str) -> Option<String> {
        Some(rpm_install("yum", package))
    }
}

impl PackageManager for NoManager {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::None
    }

    fn package_for(&self, tool: Tool) -> &'static str {
        Apt.package_for(tool)
    }

    fn install_script(&self, _package: &str) -> Option<String> {
        None
    }
}

/// The capability instance for a detected kind.
pub fn manager_for(kind: PackageManagerKind) -> Box<dyn PackageManager> {
    match kind {
        PackageManagerKind::Apt => Box::new(Apt),
        PackageManagerKind::Dnf => Box::new(Dnf),
        PackageManagerKind::Yum => Box::new(Yum),
        PackageManagerKind::None => Box::new(NoManager),
    }
}
