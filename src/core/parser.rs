//! PV-004: Config file parsing and input validation.
//!
//! The optional YAML config file carries the same settings as the flags.
//! Unknown keys are rejected rather than ignored.

use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Settings accepted from `--config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConfigFile {
    #[serde(default)]
    pub src: Option<PathBuf>,

    #[serde(default)]
    pub app_dir: Option<PathBuf>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub env_file: Option<PathBuf>,

    #[serde(default)]
    pub with_nginx: Option<bool>,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Parse a config file from disk.
pub fn parse_config_file(path: &Path) -> Result<ConfigFile, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Parse config YAML from a string. An empty document is an empty config.
pub fn parse_config(yaml: &str) -> Result<ConfigFile, String> {
    if yaml.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

fn hostname_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
            .expect("hostname pattern compiles")
    })
}

fn user_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("user pattern compiles")
    })
}

/// Validate a proxy/CORS domain.
pub fn validate_domain(domain: &str) -> Result<(), String> {
    if domain.len() > 253 || !hostname_re().is_match(domain) {
        return Err(format!("invalid domain '{}'", domain));
    }
    Ok(())
}

/// Validate a run identity name.
pub fn validate_user(user: &str) -> Result<(), String> {
    if !user_re().is_match(user) {
        return Err(format!("invalid user name '{}'", user));
    }
    Ok(())
}

/// Validate a path that is written verbatim into the unit and the nginx site.
///
/// Characters that would split or escape a directive in either file are refused.
pub fn validate_rendered_path(flag: &str, path: &Path) -> Result<(), String> {
    let text = path.to_string_lossy();
    match text
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || "\"'\\;%$#{}".contains(*c))
    {
        Some(c) => Err(format!("{} '{}' contains unsupported character {:?}", flag, text, c)),
        None => Ok(()),
    }
}

/// Validate a bound port.
pub fn validate_port(port: u16) -> Result<(), String> {
    if port == 0 {
        return Err("port must be between 1 and 65535".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pv004_parse_full_config() {
        let yaml = r#"
src: /srv/m365-monitor
app-dir: /opt/monitor
user: monitor
port: 9000
env-file: /etc/monitor.env
with-nginx: true
domain: monitor.example.com
state-dir: /var/lib/monitor-provision
"#;
        let cfg = parse_config(yaml).unwrap();
        assert_eq!(cfg.src, Some(PathBuf::from("/srv/m365-monitor")));
        assert_eq!(cfg.port, Some(9000));
        assert_eq!(cfg.with_nginx, Some(true));
        assert_eq!(cfg.domain.as_deref(), Some("monitor.example.com"));
    }

    #[test]
    fn test_pv004_parse_partial_and_empty() {
        let cfg = parse_config("port: 8080\n").unwrap();
        assert_eq!(cfg.port, Some(8080));
        assert!(cfg.user.is_none());
        assert_eq!(parse_config("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_pv004_unknown_key_rejected() {
        let err = parse_config("prot: 9000\n").unwrap_err();
        assert!(err.contains("YAML parse error"));
        assert!(err.contains("prot"));
    }

    #[test]
    fn test_pv004_bad_port_type() {
        assert!(parse_config("port: seventy\n").is_err());
        assert!(parse_config("port: 70000\n").is_err());
    }

    #[test]
    fn test_pv004_parse_file_missing() {
        let err = parse_config_file(Path::new("/nonexistent/m365.yaml")).unwrap_err();
        assert!(err.contains("failed to read"));
    }

    #[test]
    fn test_pv004_domains() {
        assert!(validate_domain("example.org").is_ok());
        assert!(validate_domain("monitor.example.com").is_ok());
        assert!(validate_domain("localhost").is_ok());
        assert!(validate_domain("bad domain").is_err());
        assert!(validate_domain("-lead.example.com").is_err());
        assert!(validate_domain("a..b").is_err());
        assert!(validate_domain("example.org;").is_err());
        assert!(validate_domain(&"a".repeat(254)).is_err());
    }

    #[test]
    fn test_pv004_users() {
        assert!(validate_user("www-data").is_ok());
        assert!(validate_user("_svc").is_ok());
        assert!(validate_user("Root").is_err());
        assert!(validate_user("a b").is_err());
        assert!(validate_user("").is_err());
    }

    #[test]
    fn test_pv004_rendered_paths() {
        assert!(validate_rendered_path("--app-dir", Path::new("/opt/m365-monitor")).is_ok());
        assert!(validate_rendered_path("--app-dir", Path::new("/srv/app_v2.1/x-y")).is_ok());
        for bad in ["/opt/my app", "/opt/a\tb", "/opt/a;b", "/opt/%h", "/opt/\"x\"", "/opt/{a}"] {
            let err = validate_rendered_path("--app-dir", Path::new(bad)).unwrap_err();
            assert!(err.starts_with("--app-dir"), "{}", err);
        }
    }

    #[test]
    fn test_pv004_port() {
        assert!(validate_port(0).is_err());
        assert!(validate_port(8000).is_ok());
    }
}
