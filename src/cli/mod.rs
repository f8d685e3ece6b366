//! PV-022: Command line. Install (default), dry run, drift check.

use crate::core::config::{HostPaths, SERVICE_NAME};
use crate::core::error::ProvisionError;
use crate::core::planner::{self, DryRunPlan};
use crate::core::resolver::{self, Invocation, Overrides};
use crate::core::types::{InstallPlan, PlanAction, RunSummary};
use crate::core::{executor, state};
use crate::transport::LocalTransport;
use crate::tripwire::drift;
use clap::Args;
use std::path::{Path, PathBuf};

/// Install options. Every setting also reads an `M365_*` variable.
#[derive(Args, Debug, Clone, Default)]
pub struct InstallArgs {
    /// Source root containing backend/ and frontend/ (default: current dir)
    #[arg(long, env = "M365_SRC", value_name = "PATH")]
    pub src: Option<PathBuf>,

    /// Install root [default: /opt/m365-monitor]
    #[arg(long, env = "M365_APP_DIR", value_name = "PATH")]
    pub app_dir: Option<PathBuf>,

    /// Account the backend runs as [default: $SUDO_USER, $USER, root]
    #[arg(long, env = "M365_USER", value_name = "NAME")]
    pub user: Option<String>,

    /// Port the backend binds on 127.0.0.1 [default: 8000]
    #[arg(long, env = "M365_PORT", value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Env file read by the service [default: /etc/m365-monitor.env]
    #[arg(long, env = "M365_ENV_FILE", value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Publish an nginx site for the frontend and /api/
    #[arg(long, env = "M365_WITH_NGINX", value_parser = clap::builder::BoolishValueParser::new())]
    pub with_nginx: bool,

    /// Public server name for nginx and the CORS origin
    #[arg(long, env = "M365_DOMAIN", value_name = "NAME")]
    pub domain: Option<String>,

    /// YAML file with the same settings (flags and env take precedence)
    #[arg(long, env = "M365_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Where the state lock and event log are kept [default: /var/lib/m365-provision]
    #[arg(long, env = "M365_STATE_DIR", value_name = "PATH")]
    pub state_dir: Option<PathBuf>,

    /// Show what would change without touching the host
    #[arg(long, conflicts_with = "check_drift")]
    pub dry_run: bool,

    /// Compare installed artifacts against the state lock
    #[arg(long)]
    pub check_drift: bool,
}

impl From<&InstallArgs> for Overrides {
    fn from(args: &InstallArgs) -> Self {
        Self {
            src: args.src.clone(),
            app_dir: args.app_dir.clone(),
            user: args.user.clone(),
            port: args.port,
            env_file: args.env_file.clone(),
            with_nginx: args.with_nginx,
            domain: args.domain.clone(),
            state_dir: args.state_dir.clone(),
            config: args.config.clone(),
        }
    }
}

/// Run whichever mode the flags select.
pub fn dispatch(args: &InstallArgs) -> Result<(), ProvisionError> {
    let flags = Overrides::from(args);
    let inv = Invocation::from_env()?;
    if args.check_drift {
        return cmd_check_drift(&resolver::resolve_state_dir(&flags, &inv)?);
    }
    let plan = resolver::resolve(&flags, &inv)?;
    if args.dry_run {
        cmd_dry_run(&plan)
    } else {
        cmd_install(&plan)
    }
}

fn cmd_install(plan: &InstallPlan) -> Result<(), ProvisionError> {
    let paths = HostPaths::default();
    let summary = executor::apply(&executor::ApplyConfig {
        plan,
        paths: &paths,
        transport: &LocalTransport,
    })?;
    print_summary(plan, &summary);
    Ok(())
}

fn cmd_dry_run(plan: &InstallPlan) -> Result<(), ProvisionError> {
    let dry = planner::plan(plan, &HostPaths::default(), &LocalTransport)?;
    print_plan(plan, &dry);
    Ok(())
}

fn cmd_check_drift(state_dir: &Path) -> Result<(), ProvisionError> {
    let lock = state::load_lock(state_dir).map_err(ProvisionError::runtime)?;
    let Some(lock) = lock else {
        println!(
            "No state found in {}. Run m365-provision first.",
            state_dir.display()
        );
        return Ok(());
    };

    println!(
        "Checking {} ({} artifacts, run {})...",
        lock.service,
        lock.artifacts.len(),
        lock.run_id
    );
    let findings = drift::detect_drift(&lock);
    if findings.is_empty() {
        println!("No drift detected.");
        return Ok(());
    }
    for f in &findings {
        println!("  DRIFTED: {} ({})", f.artifact, f.detail);
        println!("    Expected: {}", f.expected_hash);
        println!("    Actual:   {}", f.actual_hash);
    }
    println!();
    println!("Drift detected: {} artifact(s)", findings.len());
    Err(ProvisionError::runtime(format!(
        "{} artifact(s) drifted since run {}",
        findings.len(),
        lock.run_id
    )))
}

/// Display a dry-run plan to stdout.
fn print_plan(plan: &InstallPlan, dry: &DryRunPlan) {
    println!(
        "Planning: {} ({} artifacts)",
        SERVICE_NAME,
        dry.artifacts.len()
    );
    println!("  package manager: {}", dry.manager);
    if !dry.missing_tools.is_empty() {
        let names: Vec<String> = dry.missing_tools.iter().map(|t| t.to_string()).collect();
        println!("  would install:   {}", names.join(", "));
    }
    println!(
        "  project:         {:?} {} -> {}",
        dry.sync,
        plan.src.display(),
        plan.app_dir.display()
    );
    println!(
        "  venv:            {}",
        if dry.venv_exists { "present" } else { "would create" }
    );
    if let Some(layout) = dry.layout {
        println!("  nginx layout:    {}", layout);
    }
    println!();

    for a in &dry.artifacts {
        println!("  {} {} {}", a.action.symbol(), a.artifact, a.path.display());
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} unchanged.",
        dry.count(PlanAction::Create),
        dry.count(PlanAction::Update),
        dry.count(PlanAction::NoOp)
    );
    println!("Dry run: no changes applied.");
}

/// Display a finished run to stdout.
fn print_summary(plan: &InstallPlan, summary: &RunSummary) {
    for s in &summary.stages {
        println!(
            "  {:<12} {} ({:.1}s)",
            s.stage.to_string(),
            s.detail,
            s.duration.as_secs_f64()
        );
    }
    println!();
    for a in &summary.artifacts {
        println!("  {} {} {}", a.action.symbol(), a.artifact, a.path.display());
    }
    for w in &summary.warnings {
        println!("  WARNING: {}", w);
    }
    for n in &summary.notes {
        println!("  NOTE: {}", n);
    }

    println!();
    println!(
        "Install complete: {} changed, {} unchanged ({:.1}s, run {}).",
        summary.changed(),
        summary.artifacts.len() - summary.changed(),
        summary.total_duration.as_secs_f64(),
        summary.run_id
    );
    println!("  backend: http://127.0.0.1:{}/api/health", plan.port);
    if plan.with_nginx {
        let host = plan.domain.as_deref().unwrap_or("<this host>");
        println!("  site:    http://{}/", host);
    }
}
