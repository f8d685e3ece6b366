//! PV-008: Env file store. Ordered raw lines with keyed upsert.
//!
//! Lines that are not `KEY=value` assignments (comments, blanks, anything
//! else) are carried through untouched and keep their position.

use super::config;
use super::error::ProvisionError;
use super::types::{ArtifactChange, InstallPlan, PlanAction};
use crate::resources::file;
use crate::transport::{exec_checked, user_exists, Transport};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Mode of the persisted env file.
pub const ENV_FILE_MODE: u32 = 0o640;

fn assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").expect("assignment pattern compiles")
    })
}

/// In-memory env file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<String>,
}

impl EnvFile {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Read from disk; a missing file is empty.
    pub fn load(path: &Path) -> Result<Self, String> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(format!("cannot read {}: {}", path.display(), e)),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Value of the first assignment of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match split(line) {
            Some((k, v)) if k == key => Some(v),
            _ => None,
        })
    }

    /// Set `key` to `value`: first occurrence replaced in place, later
    /// duplicates removed, appended when absent.
    pub fn upsert(&mut self, key: &str, value: &str) {
        let assignment = format!("{}={}", key, value);
        let mut seen = false;
        self.lines.retain_mut(|line| {
            if !matches!(split(line), Some((k, _)) if k == key) {
                return true;
            }
            if seen {
                return false;
            }
            seen = true;
            *line = assignment.clone();
            true
        });
        if !seen {
            self.lines.push(assignment);
        }
    }

    /// Keys from `required` that are absent or have an empty value.
    pub fn missing_keys<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|k| self.get(k).is_none_or(|v| v.trim().is_empty()))
            .collect()
    }

    /// Newline-joined lines with a trailing newline (empty file stays empty).
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn split(line: &str) -> Option<(&str, &str)> {
    let caps = assignment_re().captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2)?.as_str();
    Some((key, value))
}

/// Outcome of the merge stage.
#[derive(Debug, Clone)]
pub struct EnvFileReport {
    pub change: ArtifactChange,
    pub seeded_from_template: bool,
    pub warnings: Vec<String>,
}

/// Starting content: the existing file, or the template under `project`
/// when the default path is used and nothing exists yet.
pub fn initial(plan: &InstallPlan, project: &Path) -> Result<(EnvFile, bool), String> {
    if plan.env_file.exists() {
        return Ok((EnvFile::load(&plan.env_file)?, false));
    }
    let template = project.join(config::ENV_TEMPLATE);
    if plan.env_file_is_default && template.is_file() {
        return Ok((EnvFile::load(&template)?, true));
    }
    Ok((EnvFile::default(), false))
}

/// Merged content for this plan, without touching the host.
pub fn render_for(plan: &InstallPlan, project: &Path) -> Result<(EnvFile, bool), String> {
    let (mut env, seeded) = initial(plan, project)?;
    env.upsert("PORT", &plan.port.to_string());
    env.upsert("ALLOWED_ORIGINS", &plan.allowed_origins());
    Ok((env, seeded))
}

/// Merge the managed keys into the env file and lock down its permissions.
pub fn merge(plan: &InstallPlan, transport: &dyn Transport) -> Result<EnvFileReport, ProvisionError> {
    let (env, seeded) = render_for(plan, &plan.app_dir).map_err(ProvisionError::runtime)?;
    let change = file::write_artifact("env-file", &plan.env_file, &env.render(), ENV_FILE_MODE)
        .map_err(ProvisionError::runtime)?;

    let mut warnings = Vec::new();
    if user_exists(transport, &plan.user) {
        exec_checked(
            transport,
            &file::chown_script("root", Some(&plan.user), &plan.env_file, false),
        )
        .map_err(|e| ProvisionError::runtime(format!("chown {}: {}", plan.env_file.display(), e)))?;
    } else {
        warnings.push(format!(
            "user '{}' does not exist; leaving group of {} unchanged",
            plan.user,
            plan.env_file.display()
        ));
    }

    let missing = env.missing_keys(&config::CREDENTIAL_KEYS);
    if !missing.is_empty() {
        warnings.push(format!(
            "{} not set in {}; the backend cannot reach Microsoft Graph until they are",
            missing.join(", "),
            plan.env_file.display()
        ));
    }

    Ok(EnvFileReport {
        change,
        seeded_from_template: seeded,
        warnings,
    })
}

impl EnvFileReport {
    pub fn detail(&self) -> String {
        let verb = match self.change.action {
            PlanAction::Create => "created",
            PlanAction::Update => "updated",
            PlanAction::NoOp => "unchanged",
        };
        if self.seeded_from_template {
            format!("{} {} (seeded from template)", verb, self.change.path.display())
        } else {
            format!("{} {}", verb, self.change.path.display())
        }
    }
}
