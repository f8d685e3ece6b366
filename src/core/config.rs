//! PV-003: Fixed names and host locations.

use std::path::{Path, PathBuf};

/// systemd unit / nginx site name.
pub const SERVICE_NAME: &str = "m365-monitor";

pub const DEFAULT_APP_DIR: &str = "/opt/m365-monitor";
pub const DEFAULT_ENV_FILE: &str = "/etc/m365-monitor.env";
pub const DEFAULT_STATE_DIR: &str = "/var/lib/m365-provision";
pub const DEFAULT_PORT: u16 = 8000;

/// Origin the frontend is served from during local development.
pub const DEV_ORIGIN: &str = "http://localhost:5500";

pub const BACKEND_DIR: &str = "backend";
pub const FRONTEND_DIR: &str = "frontend";
pub const VENV_DIR: &str = ".venv";

/// Files that must exist under the source root before anything is touched.
pub const BACKEND_ENTRY: &str = "backend/app.py";
pub const MANIFEST: &str = "backend/requirements.txt";
pub const FRONTEND_ENTRY: &str = "frontend/index.html";

pub const ENV_TEMPLATE: &str = "backend/.env.example";

/// ASGI application served by uvicorn (module `app`, attribute `app`).
pub const ASGI_APP: &str = "app:app";

pub const RESTART_SEC: u32 = 3;

/// Backend credentials the operator populates out-of-band.
pub const CREDENTIAL_KEYS: [&str; 3] = ["TENANT_ID", "CLIENT_ID", "CLIENT_SECRET"];

/// System directories the publishers write into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub systemd_dir: PathBuf,
    pub nginx_dir: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self::under(Path::new("/"))
    }
}

impl HostPaths {
    /// Host layout rooted somewhere other than `/` (scratch roots, chroots).
    pub fn under(root: &Path) -> Self {
        Self {
            systemd_dir: root.join("etc/systemd/system"),
            nginx_dir: root.join("etc/nginx"),
        }
    }

    pub fn unit_file(&self) -> PathBuf {
        self.systemd_dir.join(format!("{}.service", SERVICE_NAME))
    }

    pub fn sites_available(&self) -> PathBuf {
        self.nginx_dir.join("sites-available")
    }

    pub fn sites_enabled(&self) -> PathBuf {
        self.nginx_dir.join("sites-enabled")
    }

    pub fn conf_d(&self) -> PathBuf {
        self.nginx_dir.join("conf.d")
    }
}
