//! PV-001: Domain types for a provisioning run.
//!
//! The install plan, host capability kinds, rendered artifact specs, the
//! state lock and provenance events. Lock and event types derive
//! Serialize/Deserialize for YAML/JSONL persistence.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::config;

// ============================================================================
// Install plan
// ============================================================================

/// Everything a run needs to know, resolved once before any stage executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    /// Install root holding the deployed copy of the service
    pub app_dir: PathBuf,

    /// Account the backend runs as
    pub user: String,

    /// Port the backend binds on 127.0.0.1
    pub port: u16,

    /// Source root containing `backend/` and `frontend/`
    pub src: PathBuf,

    /// Persisted env file read by the unit
    pub env_file: PathBuf,

    /// True when `env_file` is the built-in default (enables template seeding)
    pub env_file_is_default: bool,

    /// Publish an nginx site in front of the backend
    pub with_nginx: bool,

    /// Public server name for the proxy and CORS origin
    pub domain: Option<String>,

    /// Where the state lock and event log live
    pub state_dir: PathBuf,
}

impl InstallPlan {
    pub fn backend_dir(&self) -> PathBuf {
        self.app_dir.join(config::BACKEND_DIR)
    }

    pub fn frontend_dir(&self) -> PathBuf {
        self.app_dir.join(config::FRONTEND_DIR)
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.app_dir.join(config::VENV_DIR)
    }

    /// Interpreter inside the isolated environment.
    pub fn venv_python(&self) -> PathBuf {
        self.venv_dir().join("bin").join("python")
    }

    /// Installed copy of the dependency manifest.
    pub fn manifest(&self) -> PathBuf {
        self.app_dir.join(config::MANIFEST)
    }

    /// Value for `ALLOWED_ORIGINS`.
    pub fn allowed_origins(&self) -> String {
        match self.domain.as_deref() {
            Some(domain) => format!("https://{},{}", domain, config::DEV_ORIGIN),
            None => "*".to_string(),
        }
    }
}

// ============================================================================
// Host capabilities
// ============================================================================

/// Package manager variant found on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManagerKind {
    Apt,
    Dnf,
    Yum,
    None,
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apt => write!(f, "apt-get"),
            Self::Dnf => write!(f, "dnf"),
            Self::Yum => write!(f, "yum"),
            Self::None => write!(f, "none"),
        }
    }
}

/// A host capability some stage depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Python,
    Venv,
    Pip,
    Nginx,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => write!(f, "python3"),
            Self::Venv => write!(f, "venv module"),
            Self::Pip => write!(f, "pip"),
            Self::Nginx => write!(f, "nginx"),
        }
    }
}

/// Which directory convention the nginx installation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyLayout {
    /// `sites-available/` plus an activation link in `sites-enabled/`
    SitesEnabled,
    /// A single `conf.d/*.conf` include directory
    ConfD,
}

impl fmt::Display for ProxyLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SitesEnabled => write!(f, "sites-enabled"),
            Self::ConfD => write!(f, "conf.d"),
        }
    }
}

// ============================================================================
// Rendered artifacts
// ============================================================================

/// systemd unit for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnitSpec {
    pub description: String,
    pub user: String,
    pub working_dir: PathBuf,
    pub env_file: PathBuf,
    pub exec_start: Vec<String>,
    pub restart: String,
    pub restart_sec: u32,
}

/// nginx server block for the frontend and the API forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySiteSpec {
    pub listen: u16,
    pub server_name: String,
    pub root: PathBuf,
    pub index: String,
    pub api_prefix: String,
    pub upstream_port: u16,
}

// ============================================================================
// Stages and results
// ============================================================================

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Probe,
    Materialize,
    Runtime,
    EnvFile,
    Service,
    Proxy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Materialize => write!(f, "materialize"),
            Self::Runtime => write!(f, "runtime"),
            Self::EnvFile => write!(f, "env-file"),
            Self::Service => write!(f, "service"),
            Self::Proxy => write!(f, "proxy"),
        }
    }
}

impl Stage {
    /// Lock entries this stage writes. A completed stage produced the whole
    /// set it still applies to.
    pub fn owned_artifacts(self) -> &'static [&'static str] {
        match self {
            Self::EnvFile => &["env-file"],
            Self::Service => &["unit"],
            Self::Proxy => &["nginx-site", "nginx-link"],
            Self::Probe | Self::Materialize | Self::Runtime => &[],
        }
    }
}

/// What happened (or would happen) to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

impl PlanAction {
    /// One-character marker used in plan and summary output.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::NoOp => " ",
        }
    }
}

/// A persisted file the run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactChange {
    pub artifact: String,
    pub path: PathBuf,
    pub action: PlanAction,
    pub hash: String,
}

/// Timing and one-line detail for a completed stage.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: Stage,
    pub duration: Duration,
    pub detail: String,
}

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub manager: PackageManagerKind,
    pub stages: Vec<StageRecord>,
    pub artifacts: Vec<ArtifactChange>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
    pub total_duration: Duration,
}

impl RunSummary {
    pub fn changed(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.action != PlanAction::NoOp)
            .count()
    }
}

// ============================================================================
// State lock
// ============================================================================

/// Record of the artifacts the last runs converged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Managed service name
    pub service: String,

    /// When the lock was written
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// Run that wrote the lock
    pub run_id: String,

    /// Whether that run reached the end of the pipeline
    pub completed: bool,

    /// Per-artifact state, keyed by artifact name
    pub artifacts: IndexMap<String, ArtifactLock>,
}

/// Per-artifact lock entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLock {
    pub path: String,

    /// BLAKE3 of the content as written
    pub hash: String,

    #[serde(default)]
    pub applied_at: Option<String>,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    RunStarted {
        run_id: String,
        version: String,
        app_dir: String,
        port: u16,
        with_nginx: bool,
    },
    StageStarted {
        run_id: String,
        stage: String,
    },
    StageCompleted {
        run_id: String,
        stage: String,
        duration_seconds: f64,
        detail: String,
    },
    StageFailed {
        run_id: String,
        stage: String,
        kind: String,
        error: String,
    },
    ArtifactWritten {
        run_id: String,
        artifact: String,
        path: String,
        action: PlanAction,
        hash: String,
    },
    SoftFailure {
        run_id: String,
        stage: String,
        detail: String,
    },
    RunCompleted {
        run_id: String,
        stages_completed: u32,
        artifacts_changed: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}
