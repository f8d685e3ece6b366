//! PV-012: Executor. The provisioning pipeline.
//!
//! privilege → sources → probe → materialize → runtime → env-file → service → proxy
//!
//! Stages run strictly in order and the first failure aborts the run. Every
//! stage transition is logged through `tracing` and appended to the event log;
//! the state lock is written whether the run completed or not.

use super::config::HostPaths;
use super::envfile::{self, EnvFileReport};
use super::error::ProvisionError;
use super::prober::{self, ProbeReport};
use super::resolver;
use super::state;
use super::types::*;
use crate::resources::package::manager_for;
use crate::resources::project::{self, MaterializeReport};
use crate::resources::proxy::{self, ProxyReport};
use crate::resources::runtime::{self, RuntimeReport};
use crate::resources::service;
use crate::transport::Transport;
use crate::tripwire::eventlog;
use std::path::Path;
use std::time::Instant;

/// Inputs for a provisioning run.
pub struct ApplyConfig<'a> {
    pub plan: &'a InstallPlan,
    pub paths: &'a HostPaths,
    pub transport: &'a dyn Transport,
}

/// What a finished stage hands back to the run record.
pub trait StageOutcome {
    /// One-line summary for logs and the final report.
    fn detail(&self) -> String;

    fn changes(&self) -> Vec<ArtifactChange> {
        Vec::new()
    }

    fn warnings(&self) -> Vec<String> {
        Vec::new()
    }

    fn notes(&self) -> Vec<String> {
        Vec::new()
    }
}

impl StageOutcome for ProbeReport {
    fn detail(&self) -> String {
        ProbeReport::detail(self)
    }

    fn warnings(&self) -> Vec<String> {
        self.soft_failures
            .iter()
            .map(|(tool, why)| format!("{} unavailable: {}", tool, why))
            .collect()
    }
}

impl StageOutcome for MaterializeReport {
    fn detail(&self) -> String {
        MaterializeReport::detail(self)
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

impl StageOutcome for RuntimeReport {
    fn detail(&self) -> String {
        RuntimeReport::detail(self)
    }
}

impl StageOutcome for EnvFileReport {
    fn detail(&self) -> String {
        EnvFileReport::detail(self)
    }

    fn changes(&self) -> Vec<ArtifactChange> {
        vec![self.change.clone()]
    }

    fn warnings(&self) -> Vec<String> {
        self.warnings.clone()
    }
}

impl StageOutcome for ArtifactChange {
    fn detail(&self) -> String {
        format!("{} {} {}", self.action, self.artifact, self.path.display())
    }

    fn changes(&self) -> Vec<ArtifactChange> {
        vec![self.clone()]
    }
}

impl StageOutcome for ProxyReport {
    fn detail(&self) -> String {
        ProxyReport::detail(self)
    }

    fn changes(&self) -> Vec<ArtifactChange> {
        self.changes.clone()
    }

    fn notes(&self) -> Vec<String> {
        self.notes.clone()
    }
}

/// Accumulates everything a run did, and mirrors it into the event log.
struct RunRecord<'a> {
    state_dir: &'a Path,
    run_id: String,
    manager: PackageManagerKind,
    stages: Vec<StageRecord>,
    artifacts: Vec<ArtifactChange>,
    warnings: Vec<String>,
    notes: Vec<String>,
}

impl<'a> RunRecord<'a> {
    fn new(state_dir: &'a Path) -> Self {
        Self {
            state_dir,
            run_id: eventlog::generate_run_id(),
            manager: PackageManagerKind::None,
            stages: Vec::new(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Event log failures never abort a run.
    fn event(&self, event: ProvenanceEvent) {
        if let Err(e) = eventlog::append_event(self.state_dir, event) {
            tracing::debug!(error = %e, "event log write failed");
        }
    }

    fn warn(&mut self, stage: Stage, detail: String) {
        tracing::warn!(%stage, "{}", detail);
        self.event(ProvenanceEvent::SoftFailure {
            run_id: self.run_id.clone(),
            stage: stage.to_string(),
            detail: detail.clone(),
        });
        self.warnings.push(detail);
    }

    fn artifact(&mut self, change: ArtifactChange) {
        tracing::info!(
            artifact = %change.artifact,
            path = %change.path.display(),
            action = %change.action,
            "artifact"
        );
        self.event(ProvenanceEvent::ArtifactWritten {
            run_id: self.run_id.clone(),
            artifact: change.artifact.clone(),
            path: change.path.to_string_lossy().to_string(),
            action: change.action,
            hash: change.hash.clone(),
        });
        self.artifacts.push(change);
    }

    /// Run one stage, recording its start, outcome and timing.
    fn stage<T: StageOutcome>(
        &mut self,
        stage: Stage,
        f: impl FnOnce() -> Result<T, ProvisionError>,
    ) -> Result<T, ProvisionError> {
        tracing::info!(%stage, "stage started");
        self.event(ProvenanceEvent::StageStarted {
            run_id: self.run_id.clone(),
            stage: stage.to_string(),
        });
        let start = Instant::now();

        let out = match f() {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(%stage, kind = %e.kind, "{}", e.message);
                self.event(ProvenanceEvent::StageFailed {
                    run_id: self.run_id.clone(),
                    stage: stage.to_string(),
                    kind: e.kind.to_string(),
                    error: e.message.clone(),
                });
                return Err(e);
            }
        };

        let duration = start.elapsed();
        for warning in out.warnings() {
            self.warn(stage, warning);
        }
        for change in out.changes() {
            self.artifact(change);
        }
        self.notes.extend(out.notes());

        let detail = out.detail();
        tracing::info!(%stage, elapsed = ?duration, "{}", detail);
        self.event(ProvenanceEvent::StageCompleted {
            run_id: self.run_id.clone(),
            stage: stage.to_string(),
            duration_seconds: duration.as_secs_f64(),
            detail: detail.clone(),
        });
        self.stages.push(StageRecord {
            stage,
            duration,
            detail,
        });
        Ok(out)
    }
}

/// Execute the full pipeline.
///
/// Privilege and source checks run before anything is written, including the
/// event log and state directory.
pub fn apply(cfg: &ApplyConfig) -> Result<RunSummary, ProvisionError> {
    let start = Instant::now();
    let plan = cfg.plan;

    resolver::require_privilege(cfg.transport)?;
    resolver::validate_sources(&plan.src)?;

    let previous = match state::load_lock(&plan.state_dir) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable state lock");
            None
        }
    };

    let mut run = RunRecord::new(&plan.state_dir);
    tracing::info!(run_id = %run.run_id, app_dir = %plan.app_dir.display(), port = plan.port, "provisioning");
    run.event(ProvenanceEvent::RunStarted {
        run_id: run.run_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        app_dir: plan.app_dir.to_string_lossy().to_string(),
        port: plan.port,
        with_nginx: plan.with_nginx,
    });

    let result = run_stages(cfg, &mut run);

    let mut lock = state::merge_run(previous, &run.run_id, &run.artifacts, result.is_ok());
    let owned: Vec<&str> = run
        .stages
        .iter()
        .flat_map(|s| s.stage.owned_artifacts().iter().copied())
        .collect();
    state::retire_unproduced(&mut lock, &owned, &run.artifacts);
    if let Err(e) = state::save_lock(&plan.state_dir, &lock) {
        tracing::warn!(error = %e, "state lock not saved");
        run.warnings.push(format!("state lock not saved: {}", e));
    }
    result?;

    let total_duration = start.elapsed();
    let summary = RunSummary {
        run_id: run.run_id,
        manager: run.manager,
        stages: run.stages,
        artifacts: run.artifacts,
        warnings: run.warnings,
        notes: run.notes,
        total_duration,
    };
    let completed = ProvenanceEvent::RunCompleted {
        run_id: summary.run_id.clone(),
        stages_completed: summary.stages.len() as u32,
        artifacts_changed: summary.changed() as u32,
        total_seconds: total_duration.as_secs_f64(),
    };
    if let Err(e) = eventlog::append_event(&plan.state_dir, completed) {
        tracing::debug!(error = %e, "event log write failed");
    }
    tracing::info!(run_id = %summary.run_id, changed = summary.changed(), "provisioning complete");
    Ok(summary)
}

fn run_stages(cfg: &ApplyConfig, run: &mut RunRecord) -> Result<(), ProvisionError> {
    let (plan, paths, t) = (cfg.plan, cfg.paths, cfg.transport);

    let probe = run.stage(Stage::Probe, || Ok(prober::probe(plan, t, true)))?;
    run.manager = probe.manager;

    run.stage(Stage::Materialize, || project::materialize(plan, t))?;
    run.stage(Stage::Runtime, || runtime::provision(plan, t))?;
    run.stage(Stage::EnvFile, || envfile::merge(plan, t))?;
    run.stage(Stage::Service, || service::publish(plan, paths, t))?;

    if plan.with_nginx {
        let manager = manager_for(probe.manager);
        run.stage(Stage::Proxy, || {
            proxy::publish(plan, paths, manager.as_ref(), t)
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::transport::fake::FakeTransport;
    use crate::tripwire::drift;
    use std::path::PathBuf;

    struct Host {
        _dir: tempfile::TempDir,
        plan: InstallPlan,
        paths: HostPaths,
    }

    /// Scratch host: project sources under `proj/`, Debian-style nginx.
    fn host() -> Host {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let src = root.join("proj");
        std::fs::create_dir_all(src.join("backend")).unwrap();
        std::fs::create_dir_all(src.join("frontend")).unwrap();
        std::fs::write(src.join("backend/app.py"), "from fastapi import FastAPI\napp = FastAPI()\n").unwrap();
        std::fs::write(src.join("backend/requirements.txt"), "fastapi\nuvicorn\nmsal\n").unwrap();
        std::fs::write(
            src.join("backend/.env.example"),
            "TENANT_ID=\nCLIENT_ID=\nCLIENT_SECRET=\n",
        )
        .unwrap();
        std::fs::write(src.join("frontend/index.html"), "<!doctype html>\n").unwrap();

        let paths = HostPaths::under(&root);
        std::fs::create_dir_all(paths.sites_enabled()).unwrap();

        let plan = InstallPlan {
            app_dir: root.join("opt/m365-monitor"),
            user: "svc".to_string(),
            port: 9000,
            src,
            env_file: root.join("etc/m365-monitor.env"),
            env_file_is_default: true,
            with_nginx: true,
            domain: Some("monitor.example.com".to_string()),
            state_dir: root.join("var/lib/m365-provision"),
        };
        Host {
            _dir: dir,
            plan,
            paths,
        }
    }

    fn transport(plan: &InstallPlan) -> FakeTransport {
        let python: PathBuf = plan.venv_python();
        FakeTransport::new()
            .with_commands(&["apt-get", "python3", "nginx"])
            .passthrough("cp -a")
            .on("-m venv", move || {
                std::fs::create_dir_all(python.parent().unwrap()).unwrap();
                std::fs::write(&python, "").unwrap();
            })
    }

    fn cfg<'a>(h: &'a Host, t: &'a FakeTransport) -> ApplyConfig<'a> {
        ApplyConfig {
            plan: &h.plan,
            paths: &h.paths,
            transport: t,
        }
    }

    #[test]
    fn test_pv012_full_scenario() {
        let h = host();
        let t = transport(&h.plan);
        let summary = apply(&cfg(&h, &t)).unwrap();

        assert_eq!(summary.manager, PackageManagerKind::Apt);
        assert_eq!(summary.stages.len(), 6);
        assert_eq!(summary.stages[5].stage, Stage::Proxy);

        let env = std::fs::read_to_string(&h.plan.env_file).unwrap();
        assert!(env.contains("PORT=9000\n"));
        assert!(env.contains("ALLOWED_ORIGINS=https://monitor.example.com,http://localhost:5500\n"));
        assert!(env.starts_with("TENANT_ID=\n"));

        let unit = std::fs::read_to_string(h.paths.unit_file()).unwrap();
        assert!(unit.contains("--port 9000"));
        assert!(unit.contains("User=svc"));

        let site = std::fs::read_to_string(h.paths.sites_available().join("m365-monitor")).unwrap();
        assert!(site.contains("server_name monitor.example.com;"));
        assert!(site.contains("proxy_pass http://127.0.0.1:9000;"));
        assert!(h.paths.sites_enabled().join("m365-monitor").is_symlink());
        assert!(h.plan.app_dir.join("frontend/index.html").exists());

        let lock = state::load_lock(&h.plan.state_dir).unwrap().unwrap();
        assert!(lock.completed);
        let names: Vec<_> = lock.artifacts.keys().cloned().collect();
        assert_eq!(names, vec!["env-file", "unit", "nginx-site", "nginx-link"]);

        let events = eventlog::read_events(&h.plan.state_dir).unwrap();
        assert!(matches!(events.first().unwrap().event, ProvenanceEvent::RunStarted { .. }));
        assert!(matches!(events.last().unwrap().event, ProvenanceEvent::RunCompleted { .. }));
        assert!(summary.warnings.iter().any(|w| w.contains("CLIENT_SECRET")));

        let order: Vec<usize> = ["systemctl daemon-reload", "nginx -t", "systemctl reload nginx"]
            .iter()
            .map(|n| t.scripts().iter().position(|s| s.contains(n)).unwrap())
            .collect();
        assert!(order[0] < order[1] && order[1] < order[2]);
    }

    #[test]
    fn test_pv012_rerun_is_idempotent() {
        let h = host();
        let t = transport(&h.plan);
        apply(&cfg(&h, &t)).unwrap();
        let env_before = std::fs::read(&h.plan.env_file).unwrap();
        let unit_before = std::fs::read(h.paths.unit_file()).unwrap();

        let second = apply(&cfg(&h, &t)).unwrap();
        assert_eq!(second.changed(), 0);
        assert_eq!(std::fs::read(&h.plan.env_file).unwrap(), env_before);
        assert_eq!(std::fs::read(h.paths.unit_file()).unwrap(), unit_before);
        assert!(second.stages[1].detail.starts_with("unchanged"));
        assert!(second.stages[2].detail.starts_with("venv present"));
    }

    #[test]
    fn test_pv012_missing_source_touches_nothing() {
        let h = host();
        std::fs::remove_file(h.plan.src.join("backend/app.py")).unwrap();
        let t = transport(&h.plan);
        let err = apply(&cfg(&h, &t)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Precondition);
        assert!(err.message.contains("backend/app.py"));
        assert!(!h.plan.app_dir.exists());
        assert!(!h.plan.env_file.exists());
        assert!(!h.paths.unit_file().exists());
        assert!(!h.plan.state_dir.exists());
    }

    #[test]
    fn test_pv012_unprivileged_touches_nothing() {
        let h = host();
        let t = transport(&h.plan).respond("id -u", 0, "1000\n", "");
        let err = apply(&cfg(&h, &t)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Privilege);
        assert!(!h.plan.app_dir.exists());
        assert!(!h.plan.state_dir.exists());
        assert_eq!(t.scripts().len(), 1);
    }

    #[test]
    fn test_pv012_nginx_rejects_config() {
        let h = host();
        let t = transport(&h.plan).respond("nginx -t", 1, "", "nginx: configuration file test failed");
        let err = apply(&cfg(&h, &t)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExternalTool);
        assert!(!t.ran("systemctl reload nginx"));

        let lock = state::load_lock(&h.plan.state_dir).unwrap().unwrap();
        assert!(!lock.completed);
        assert!(lock.artifacts.contains_key("unit"));

        let events = eventlog::read_events(&h.plan.state_dir).unwrap();
        assert!(events.iter().any(|e| matches!(
            &e.event,
            ProvenanceEvent::StageFailed { stage, kind, .. } if stage == "proxy" && kind == "EXTERNAL_TOOL"
        )));
        assert!(!events.iter().any(|e| matches!(e.event, ProvenanceEvent::RunCompleted { .. })));
    }

    #[test]
    fn test_pv012_service_failure_stops_pipeline() {
        let h = host();
        let t = transport(&h.plan)
            .respond("systemctl restart 'm365-monitor'", 1, "", "Job for m365-monitor.service failed")
            .respond("systemctl status", 3, "code=exited, status=1/FAILURE\n", "");
        let err = apply(&cfg(&h, &t)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert!(err.message.contains("status=1/FAILURE"));
        assert!(!h.paths.sites_available().join("m365-monitor").exists());
        assert!(!t.ran("nginx -t"));
    }

    #[test]
    fn test_pv012_without_proxy() {
        let mut h = host();
        h.plan.with_nginx = false;
        h.plan.domain = None;
        let t = transport(&h.plan);
        let summary = apply(&cfg(&h, &t)).unwrap();
        assert_eq!(summary.stages.len(), 5);
        assert!(!t.ran("nginx"));
        let env = std::fs::read_to_string(&h.plan.env_file).unwrap();
        assert!(env.contains("ALLOWED_ORIGINS=*\n"));
    }

    #[test]
    fn test_pv012_lock_feeds_drift_check() {
        let h = host();
        let t = transport(&h.plan);
        apply(&cfg(&h, &t)).unwrap();
        let lock = state::load_lock(&h.plan.state_dir).unwrap().unwrap();
        assert!(drift::detect_drift(&lock).is_empty());

        std::fs::write(h.paths.unit_file(), "[Unit]\n").unwrap();
        let findings = drift::detect_drift(&lock);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].artifact, "unit");
    }

    #[test]
    fn test_pv012_layout_switch_retires_link() {
        let h = host();
        let t = transport(&h.plan);
        apply(&cfg(&h, &t)).unwrap();
        std::fs::remove_dir_all(h.paths.sites_enabled()).unwrap();

        apply(&cfg(&h, &t)).unwrap();
        let lock = state::load_lock(&h.plan.state_dir).unwrap().unwrap();
        let names: Vec<_> = lock.artifacts.keys().cloned().collect();
        assert_eq!(names, vec!["env-file", "unit", "nginx-site"]);
        assert_eq!(
            lock.artifacts["nginx-site"].path,
            h.paths.conf_d().join("m365-monitor.conf").to_string_lossy()
        );
        assert!(drift::detect_drift(&lock).is_empty());
    }
}
