//! PV-005: Configuration resolver. Flags, environment and config file into
//! one immutable [`InstallPlan`], plus the checks that must pass before any
//! mutation: elevation and presence of the upstream source files.
//!
//! Precedence per setting: flag, then `M365_*` environment variable (both
//! handled by clap), then `--config` file, then built-in default.

use super::config;
use super::error::ProvisionError;
use super::parser::{self, ConfigFile};
use super::types::InstallPlan;
use crate::transport::Transport;
use std::path::{Path, PathBuf};

/// Settings as given on the command line (or their environment fallbacks).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub src: Option<PathBuf>,
    pub app_dir: Option<PathBuf>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub env_file: Option<PathBuf>,
    pub with_nginx: bool,
    pub domain: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Facts about the invoking process the defaults depend on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub cwd: PathBuf,
    /// `$SUDO_USER`: the account that elevated
    pub sudo_user: Option<String>,
    /// `$USER`
    pub login_user: Option<String>,
}

impl Invocation {
    /// Read from the current process.
    pub fn from_env() -> Result<Self, ProvisionError> {
        let cwd = std::env::current_dir()
            .map_err(|e| ProvisionError::precondition(format!("cannot read working directory: {}", e)))?;
        Ok(Self {
            cwd,
            sudo_user: std::env::var("SUDO_USER").ok(),
            login_user: std::env::var("USER").ok(),
        })
    }

    /// The invoking (or elevating) identity.
    pub fn default_user(&self) -> String {
        [&self.sudo_user, &self.login_user]
            .into_iter()
            .flatten()
            .map(|u| u.trim())
            .find(|u| !u.is_empty())
            .unwrap_or("root")
            .to_string()
    }
}

/// Build the install plan. Touches nothing on the host.
pub fn resolve(flags: &Overrides, inv: &Invocation) -> Result<InstallPlan, ProvisionError> {
    let file = match &flags.config {
        Some(path) => parser::parse_config_file(&absolutize(&inv.cwd, path))
            .map_err(ProvisionError::user_input)?,
        None => ConfigFile::default(),
    };

    let port = flags.port.or(file.port).unwrap_or(config::DEFAULT_PORT);
    parser::validate_port(port).map_err(ProvisionError::user_input)?;

    let user = flags
        .user
        .clone()
        .or(file.user)
        .unwrap_or_else(|| inv.default_user());
    parser::validate_user(&user).map_err(ProvisionError::user_input)?;

    let domain = flags
        .domain
        .clone()
        .or(file.domain)
        .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty());
    if let Some(ref d) = domain {
        parser::validate_domain(d).map_err(ProvisionError::user_input)?;
    }

    let src = match flags.src.clone().or(file.src) {
        Some(path) => absolutize(&inv.cwd, &path),
        None => detect_source_root(&inv.cwd)?,
    };

    let app_dir = absolutize(
        &inv.cwd,
        &flags
            .app_dir
            .clone()
            .or(file.app_dir)
            .unwrap_or_else(|| PathBuf::from(config::DEFAULT_APP_DIR)),
    );

    let (env_file, env_file_is_default) = match flags.env_file.clone().or(file.env_file) {
        Some(path) => (absolutize(&inv.cwd, &path), false),
        None => (PathBuf::from(config::DEFAULT_ENV_FILE), true),
    };

    let state_dir = absolutize(
        &inv.cwd,
        &flags
            .state_dir
            .clone()
            .or(file.state_dir)
            .unwrap_or_else(|| PathBuf::from(config::DEFAULT_STATE_DIR)),
    );

    parser::validate_rendered_path("--app-dir", &app_dir).map_err(ProvisionError::user_input)?;
    parser::validate_rendered_path("--env-file", &env_file).map_err(ProvisionError::user_input)?;

    Ok(InstallPlan {
        app_dir,
        user,
        port,
        src,
        env_file,
        env_file_is_default,
        with_nginx: flags.with_nginx || file.with_nginx.unwrap_or(false),
        domain,
        state_dir,
    })
}

/// State directory only, for read-only commands that need no source root.
pub fn resolve_state_dir(flags: &Overrides, inv: &Invocation) -> Result<PathBuf, ProvisionError> {
    let from_file = match &flags.config {
        Some(path) => parser::parse_config_file(&absolutize(&inv.cwd, path))
            .map_err(ProvisionError::user_input)?
            .state_dir,
        None => None,
    };
    let dir = flags
        .state_dir
        .clone()
        .or(from_file)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_STATE_DIR));
    Ok(absolutize(&inv.cwd, &dir))
}

/// Use the working directory as source root when it holds both subtrees.
pub fn detect_source_root(cwd: &Path) -> Result<PathBuf, ProvisionError> {
    let has_backend = cwd.join(config::BACKEND_DIR).is_dir();
    let has_frontend = cwd.join(config::FRONTEND_DIR).is_dir();
    if has_backend && has_frontend {
        return Ok(cwd.to_path_buf());
    }
    Err(ProvisionError::precondition(format!(
        "no --src given and {} does not contain {}/ and {}/",
        cwd.display(),
        config::BACKEND_DIR,
        config::FRONTEND_DIR
    )))
}

/// Fail unless running with effective uid 0.
pub fn require_privilege(transport: &dyn Transport) -> Result<(), ProvisionError> {
    let out = transport
        .exec("id -u")
        .map_err(|e| ProvisionError::privilege(format!("cannot determine effective uid: {}", e)))?;
    match out.stdout.trim() {
        "0" if out.success() => Ok(()),
        uid => Err(ProvisionError::privilege(format!(
            "must run as root (effective uid {}); re-run with sudo",
            if uid.is_empty() { "unknown" } else { uid }
        ))),
    }
}

/// Check the upstream files every later stage relies on.
pub fn validate_sources(src: &Path) -> Result<(), ProvisionError> {
    let missing: Vec<String> = [config::BACKEND_ENTRY, config::MANIFEST, config::FRONTEND_ENTRY]
        .iter()
        .map(|rel| src.join(rel))
        .filter(|p| !p.is_file())
        .map(|p| p.display().to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ProvisionError::precondition(format!(
        "missing in source root {}: {}",
        src.display(),
        missing.join(", ")
    )))
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    std::fs::canonicalize(&joined).unwrap_or(joined)
}
