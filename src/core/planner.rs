//! PV-021: Dry-run planning. Render every artifact and diff it against the
//! host without changing anything.

use super::config::HostPaths;
use super::envfile;
use super::error::ProvisionError;
use super::prober;
use super::resolver;
use super::types::*;
use crate::resources::file;
use crate::resources::project::{self, SyncMethod};
use crate::resources::{proxy, service};
use crate::transport::Transport;
use crate::tripwire::hasher;
use std::path::PathBuf;

/// Everything a run would do, as far as it can be known up front.
#[derive(Debug, Clone)]
pub struct DryRunPlan {
    pub manager: PackageManagerKind,
    pub missing_tools: Vec<Tool>,
    pub sync: SyncMethod,
    pub venv_exists: bool,
    pub layout: Option<ProxyLayout>,
    pub artifacts: Vec<ArtifactChange>,
}

impl DryRunPlan {
    pub fn count(&self, action: PlanAction) -> usize {
        self.artifacts.iter().filter(|a| a.action == action).count()
    }
}

fn planned(artifact: &str, path: PathBuf, content: &str) -> ArtifactChange {
    ArtifactChange {
        artifact: artifact.to_string(),
        action: file::plan_content(&path, content),
        path,
        hash: hasher::hash_string(content),
    }
}

/// Plan a run. Needs no privilege and writes nothing.
pub fn plan(
    plan: &InstallPlan,
    paths: &HostPaths,
    transport: &dyn Transport,
) -> Result<DryRunPlan, ProvisionError> {
    resolver::validate_sources(&plan.src)?;

    let probe = prober::probe(plan, transport, false);
    let mut artifacts = Vec::new();

    // The template is copied by materialize, so look for it in the source.
    let (env, _) = envfile::render_for(plan, &plan.src).map_err(ProvisionError::runtime)?;
    artifacts.push(planned("env-file", plan.env_file.clone(), &env.render()));

    let unit = service::render_unit(&service::unit_spec(plan));
    artifacts.push(planned("unit", paths.unit_file(), &unit));

    let layout = plan.with_nginx.then(|| proxy::detect_layout(paths));
    if let Some(layout) = layout {
        let site = proxy::site_path(paths, layout);
        let content = proxy::render_site(&proxy::site_spec(plan));
        artifacts.push(planned("nginx-site", site.clone(), &content));
        if let Some(link) = proxy::link_path(paths, layout) {
            artifacts.push(ArtifactChange {
                artifact: "nginx-link".to_string(),
                action: file::plan_symlink(&link, &site),
                hash: hasher::hash_string(&site.to_string_lossy()),
                path: link,
            });
        }
    }

    Ok(DryRunPlan {
        manager: probe.manager,
        missing_tools: probe.soft_failures.iter().map(|(t, _)| *t).collect(),
        sync: project::sync_method(plan, transport),
        venv_exists: plan.venv_python().exists(),
        layout,
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::executor::{self, ApplyConfig};
    use crate::transport::fake::FakeTransport;
    use std::path::Path;

    fn setup(root: &Path) -> (InstallPlan, HostPaths) {
        let src = root.join("proj");
        std::fs::create_dir_all(src.join("backend")).unwrap();
        std::fs::create_dir_all(src.join("frontend")).unwrap();
        std::fs::write(src.join("backend/app.py"), "app = None\n").unwrap();
        std::fs::write(src.join("backend/requirements.txt"), "fastapi\n").unwrap();
        std::fs::write(src.join("backend/.env.example"), "TENANT_ID=\n").unwrap();
        std::fs::write(src.join("frontend/index.html"), "<html/>\n").unwrap();
        let paths = HostPaths::under(root);
        std::fs::create_dir_all(paths.sites_enabled()).unwrap();
        let plan = InstallPlan {
            app_dir: root.join("opt/m365-monitor"),
            user: "svc".to_string(),
            port: 8000,
            src,
            env_file: root.join("etc/m365-monitor.env"),
            env_file_is_default: true,
            with_nginx: true,
            domain: None,
            state_dir: root.join("state"),
        };
        (plan, paths)
    }

    #[test]
    fn test_pv021_fresh_host_all_create() {
        let dir = tempfile::tempdir().unwrap();
        let (p, paths) = setup(dir.path());
        let t = FakeTransport::new().with_commands(&["dnf", "python3"]);
        let dry = plan(&p, &paths, &t).unwrap();

        assert_eq!(dry.manager, PackageManagerKind::Dnf);
        assert_eq!(dry.missing_tools, vec![Tool::Nginx]);
        assert_eq!(dry.sync, SyncMethod::Replace);
        assert!(!dry.venv_exists);
        assert_eq!(dry.layout, Some(ProxyLayout::SitesEnabled));
        assert_eq!(dry.artifacts.len(), 4);
        assert_eq!(dry.count(PlanAction::Create), 4);

        assert!(!p.app_dir.exists());
        assert!(!p.env_file.exists());
        assert!(!p.state_dir.exists());
        assert!(!t.ran("dnf install"));
        assert!(!t.ran("id -u"));
    }

    #[test]
    fn test_pv021_after_apply_all_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (p, paths) = setup(dir.path());
        let python = p.venv_python();
        let t = FakeTransport::new()
            .with_commands(&["apt-get", "python3", "nginx"])
            .passthrough("cp -a")
            .on("-m venv", move || {
                std::fs::create_dir_all(python.parent().unwrap()).unwrap();
                std::fs::write(&python, "").unwrap();
            });
        executor::apply(&ApplyConfig {
            plan: &p,
            paths: &paths,
            transport: &t,
        })
        .unwrap();

        let dry = plan(&p, &paths, &t).unwrap();
        assert_eq!(dry.count(PlanAction::NoOp), 4);
        assert!(dry.venv_exists);
    }

    #[test]
    fn test_pv021_port_change_updates() {
        let dir = tempfile::tempdir().unwrap();
        let (mut p, paths) = setup(dir.path());
        p.with_nginx = false;
        let t = FakeTransport::new();
        std::fs::create_dir_all(p.env_file.parent().unwrap()).unwrap();
        std::fs::write(&p.env_file, "TENANT_ID=\nPORT=8000\nALLOWED_ORIGINS=*\n").unwrap();
        p.port = 9100;
        let dry = plan(&p, &paths, &t).unwrap();
        assert_eq!(dry.layout, None);
        assert_eq!(dry.artifacts[0].action, PlanAction::Update);
        assert_eq!(dry.artifacts[1].action, PlanAction::Create);
    }

    #[test]
    fn test_pv021_missing_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (p, paths) = setup(dir.path());
        std::fs::remove_file(p.src.join("frontend/index.html")).unwrap();
        let err = plan(&p, &paths, &FakeTransport::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Precondition);
    }
}
