//! PV-018: nginx site. Layout detection, rendering, validation, reload.

use crate::core::config::{HostPaths, SERVICE_NAME};
use crate::core::error::ProvisionError;
use crate::core::types::{ArtifactChange, InstallPlan, ProxyLayout, ProxySiteSpec, Tool};
use crate::resources::file;
use crate::resources::package::PackageManager;
use crate::transport::{exec_checked, Transport};
use std::path::PathBuf;

pub const SITE_MODE: u32 = 0o644;

/// Outcome of publishing the site.
#[derive(Debug, Clone)]
pub struct ProxyReport {
    pub layout: ProxyLayout,
    pub changes: Vec<ArtifactChange>,
    pub notes: Vec<String>,
}

impl ProxyReport {
    pub fn detail(&self) -> String {
        format!("{} layout, nginx reloaded", self.layout)
    }
}

/// Which convention the host's nginx uses.
pub fn detect_layout(paths: &HostPaths) -> ProxyLayout {
    if paths.sites_enabled().is_dir() {
        ProxyLayout::SitesEnabled
    } else {
        ProxyLayout::ConfD
    }
}

/// Where the site file lives under `layout`.
pub fn site_path(paths: &HostPaths, layout: ProxyLayout) -> PathBuf {
    match layout {
        ProxyLayout::SitesEnabled => paths.sites_available().join(SERVICE_NAME),
        ProxyLayout::ConfD => paths.conf_d().join(format!("{}.conf", SERVICE_NAME)),
    }
}

/// Activation link, only in the sites-enabled layout.
pub fn link_path(paths: &HostPaths, layout: ProxyLayout) -> Option<PathBuf> {
    match layout {
        ProxyLayout::SitesEnabled => Some(paths.sites_enabled().join(SERVICE_NAME)),
        ProxyLayout::ConfD => None,
    }
}

pub fn site_spec(plan: &InstallPlan) -> ProxySiteSpec {
    ProxySiteSpec {
        listen: 80,
        server_name: plan.domain.clone().unwrap_or_else(|| "_".to_string()),
        root: plan.frontend_dir(),
        index: "index.html".to_string(),
        api_prefix: "/api/".to_string(),
        upstream_port: plan.port,
    }
}

/// Render the server block.
pub fn render_site(spec: &ProxySiteSpec) -> String {
    format!(
        "server {{\n\
         \x20   listen {listen};\n\
         \x20   server_name {server_name};\n\
         \n\
         \x20   root {root};\n\
         \x20   index {index};\n\
         \n\
         \x20   location / {{\n\
         \x20       try_files $uri $uri/ /{index};\n\
         \x20   }}\n\
         \n\
         \x20   location {api_prefix} {{\n\
         \x20       proxy_pass http://127.0.0.1:{port};\n\
         \x20       proxy_http_version 1.1;\n\
         \x20       proxy_set_header Host $host;\n\
         \x20       proxy_set_header X-Real-IP $remote_addr;\n\
         \x20       proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n\
         \x20       proxy_set_header X-Forwarded-Proto $scheme;\n\
         \x20   }}\n\
         }}\n",
        listen = spec.listen,
        server_name = spec.server_name,
        root = spec.root.display(),
        index = spec.index,
        api_prefix = spec.api_prefix,
        port = spec.upstream_port,
    )
}

/// Shell that enables nginx and applies the new config.
pub fn reload_script() -> String {
    "set -euo pipefail\n\
     systemctl enable nginx\n\
     if systemctl is-active --quiet nginx; then\n\
       systemctl reload nginx\n\
     else\n\
       systemctl start nginx\n\
     fi"
    .to_string()
}

/// Make sure nginx is installed, then write, validate and activate the site.
pub fn publish(
    plan: &InstallPlan,
    paths: &HostPaths,
    manager: &dyn PackageManager,
    transport: &dyn Transport,
) -> Result<ProxyReport, ProvisionError> {
    if !transport.has_command("nginx") {
        if let Err(e) = manager.ensure_installed(transport, Tool::Nginx) {
            tracing::warn!(error = %e, "nginx install attempt failed");
        }
        if !transport.has_command("nginx") {
            return Err(ProvisionError::external_tool(format!(
                "nginx is not installed and could not be installed with {}",
                manager.kind()
            )));
        }
    }

    let layout = detect_layout(paths);
    let site = site_path(paths, layout);
    let content = render_site(&site_spec(plan));

    let mut changes = vec![file::write_artifact("nginx-site", &site, &content, SITE_MODE)
        .map_err(ProvisionError::runtime)?];
    let mut notes = Vec::new();
    match link_path(paths, layout) {
        Some(link) => changes.push(
            file::ensure_symlink("nginx-link", &link, &site).map_err(ProvisionError::runtime)?,
        ),
        None => notes.push(format!(
            "nginx site written to {}; make sure nginx.conf includes {}/*.conf",
            site.display(),
            paths.conf_d().display()
        )),
    }

    exec_checked(transport, "nginx -t").map_err(|e| {
        ProvisionError::external_tool(format!(
            "nginx rejected the configuration in {}; not reloading: {}",
            site.display(),
            e
        ))
    })?;
    exec_checked(transport, &reload_script())
        .map_err(|e| ProvisionError::external_tool(format!("cannot reload nginx: {}", e)))?;

    Ok(ProxyReport {
        layout,
        changes,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::types::PlanAction;
    use crate::resources::package::{Apt, NoManager};
    use crate::transport::fake::FakeTransport;

    fn plan(domain: Option<&str>) -> InstallPlan {
        InstallPlan {
            app_dir: PathBuf::from("/opt/m365-monitor"),
            user: "svc".to_string(),
            port: 9000,
            src: PathBuf::from("/src"),
            env_file: PathBuf::from("/etc/m365-monitor.env"),
            env_file_is_default: true,
            with_nginx: true,
            domain: domain.map(str::to_string),
            state_dir: PathBuf::from("/state"),
        }
    }

    #[test]
    fn test_pv018_render_site() {
        let site = render_site(&site_spec(&plan(Some("monitor.example.com"))));
        assert!(site.contains("    listen 80;\n"));
        assert!(site.contains("    server_name monitor.example.com;\n"));
        assert!(site.contains("    root /opt/m365-monitor/frontend;\n"));
        assert!(site.contains("try_files $uri $uri/ /index.html;"));
        assert!(site.contains("location /api/ {"));
        assert!(site.contains("proxy_pass http://127.0.0.1:9000;"));
        for header in ["Host", "X-Real-IP", "X-Forwarded-For", "X-Forwarded-Proto"] {
            assert!(site.contains(&format!("proxy_set_header {} ", header)));
        }
    }

    #[test]
    fn test_pv018_default_server_name() {
        let site = render_site(&site_spec(&plan(None)));
        assert!(site.contains("server_name _;"));
    }

    #[test]
    fn test_pv018_layout_detection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::under(dir.path());
        assert_eq!(detect_layout(&paths), ProxyLayout::ConfD);
        std::fs::create_dir_all(paths.sites_enabled()).unwrap();
        assert_eq!(detect_layout(&paths), ProxyLayout::SitesEnabled);
        assert!(site_path(&paths, ProxyLayout::ConfD).ends_with("conf.d/m365-monitor.conf"));
        assert!(link_path(&paths, ProxyLayout::ConfD).is_none());
    }

    #[test]
    fn test_pv018_sites_enabled_publish() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::under(dir.path());
        std::fs::create_dir_all(paths.sites_enabled()).unwrap();
        let t = FakeTransport::new().with_commands(&["nginx"]);

        let report = publish(&plan(None), &paths, &Apt, &t).unwrap();
        assert_eq!(report.layout, ProxyLayout::SitesEnabled);
        let link = paths.sites_enabled().join("m365-monitor");
        assert_eq!(
            std::fs::read_link(&link).unwrap(),
            paths.sites_available().join("m365-monitor")
        );
        assert!(report.notes.is_empty());
        assert!(t.ran("nginx -t"));
        assert!(t.ran("systemctl reload nginx"));

        let again = publish(&plan(None), &paths, &Apt, &t).unwrap();
        assert!(again.changes.iter().all(|c| c.action == PlanAction::NoOp));
    }

    #[test]
    fn test_pv018_conf_d_publish_notes() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::under(dir.path());
        let t = FakeTransport::new().with_commands(&["nginx"]);
        let report = publish(&plan(None), &paths, &Apt, &t).unwrap();
        assert_eq!(report.layout, ProxyLayout::ConfD);
        assert_eq!(report.changes.len(), 1);
        assert!(paths.conf_d().join("m365-monitor.conf").exists());
        assert!(!paths.sites_enabled().exists());
        assert_eq!(report.notes.len(), 1);
    }

    #[test]
    fn test_pv018_invalid_config_not_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::under(dir.path());
        let t = FakeTransport::new()
            .with_commands(&["nginx"])
            .respond("nginx -t", 1, "", "nginx: [emerg] unexpected \"}\"");
        let err = publish(&plan(None), &paths, &Apt, &t).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExternalTool);
        assert!(err.message.contains("[emerg]"));
        assert!(!t.ran("systemctl reload nginx"));
        assert!(!t.ran("systemctl start nginx"));
    }

    #[test]
    fn test_pv018_nginx_missing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::under(dir.path());
        let t = FakeTransport::new();
        let err = publish(&plan(None), &paths, &NoManager, &t).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExternalTool);
        assert!(!site_path(&paths, ProxyLayout::ConfD).exists());
    }
}
