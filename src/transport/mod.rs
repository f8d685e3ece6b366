//! PV-010: Transport abstraction: how generated scripts reach the host.
//!
//! Every host mutation outside plain file writes goes through a [`Transport`]
//! so a run can be replayed against a recording double in tests.

pub mod local;

pub use local::LocalTransport;

/// Output from executing a script on the host.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if present, else stdout, trimmed.
    pub fn diagnostic(&self) -> &str {
        let err = self.stderr.trim();
        if err.is_empty() {
            self.stdout.trim()
        } else {
            err
        }
    }
}

/// Executes scripts and answers binary lookups on the target host.
pub trait Transport {
    /// Run a bash script, capturing its output.
    fn exec(&self, script: &str) -> Result<ExecOutput, String>;

    /// Whether `name` resolves to an executable on the host's PATH.
    fn has_command(&self, name: &str) -> bool;
}

/// Run a script and turn a non-zero exit into an error.
pub fn exec_checked(transport: &dyn Transport, script: &str) -> Result<ExecOutput, String> {
    let out = transport.exec(script)?;
    if out.success() {
        Ok(out)
    } else {
        Err(format!("exit code {}: {}", out.exit_code, out.diagnostic()))
    }
}

/// Single-quote a value for interpolation into a bash script.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Whether an account exists on the host.
pub fn user_exists(transport: &dyn Transport, user: &str) -> bool {
    matches!(transport.exec(&format!("id -u {}", quote(user))), Ok(out) if out.success())
}

#[cfg(test)]
pub mod fake {
    //! Recording transport for pipeline tests.

    use super::{local, ExecOutput, Transport};
    use std::cell::RefCell;
    use std::collections::HashSet;

    type Hook = Box<dyn Fn()>;

    /// Records every script; answers from canned responses.
    ///
    /// Responses match when the script contains the needle, first match wins.
    /// Scripts matching a passthrough needle run for real through bash.
    /// Unmatched scripts succeed with empty output, except a bare `id -u`,
    /// which reports uid 0.
    pub struct FakeTransport {
        commands: HashSet<String>,
        responses: Vec<(String, ExecOutput)>,
        passthrough: Vec<String>,
        hooks: Vec<(String, Hook)>,
        scripts: RefCell<Vec<String>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self {
                commands: HashSet::new(),
                responses: Vec::new(),
                passthrough: Vec::new(),
                hooks: Vec::new(),
                scripts: RefCell::new(Vec::new()),
            }
        }

        pub fn with_commands(mut self, names: &[&str]) -> Self {
            self.commands.extend(names.iter().map(|n| n.to_string()));
            self
        }

        pub fn respond(mut self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
            self.responses.push((
                needle.to_string(),
                ExecOutput {
                    exit_code,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
            ));
            self
        }

        pub fn passthrough(mut self, needle: &str) -> Self {
            self.passthrough.push(needle.to_string());
            self
        }

        pub fn on(mut self, needle: &str, hook: impl Fn() + 'static) -> Self {
            self.hooks.push((needle.to_string(), Box::new(hook)));
            self
        }

        pub fn scripts(&self) -> Vec<String> {
            self.scripts.borrow().clone()
        }

        pub fn ran(&self, needle: &str) -> bool {
            self.scripts.borrow().iter().any(|s| s.contains(needle))
        }
    }

    impl Transport for FakeTransport {
        fn exec(&self, script: &str) -> Result<ExecOutput, String> {
            self.scripts.borrow_mut().push(script.to_string());
            for (needle, hook) in &self.hooks {
                if script.contains(needle.as_str()) {
                    hook();
                }
            }
            if let Some((_, out)) = self
                .responses
                .iter()
                .find(|(needle, _)| script.contains(needle.as_str()))
            {
                return Ok(out.clone());
            }
            if self.passthrough.iter().any(|n| script.contains(n.as_str())) {
                return local::exec_local(script);
            }
            let stdout = if script.trim() == "id -u" { "0\n" } else { "" };
            Ok(ExecOutput {
                exit_code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            })
        }

        fn has_command(&self, name: &str) -> bool {
            self.commands.contains(name)
        }
    }
}
