//! PV-002: Fatal error kinds and the stage error type.

use std::fmt;
use thiserror::Error;

/// Class of a fatal failure. Decides the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or unknown flags / config keys
    UserInput,
    /// Not running elevated
    Privilege,
    /// Expected source files absent
    Precondition,
    /// Runtime, dependency, sync or service failure
    Runtime,
    /// Proxy missing or its configuration rejected
    ExternalTool,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::UserInput => 2,
            Self::Privilege => 3,
            Self::Precondition => 4,
            Self::Runtime => 5,
            Self::ExternalTool => 6,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInput => write!(f, "USER_INPUT"),
            Self::Privilege => write!(f, "PRIVILEGE"),
            Self::Precondition => write!(f, "PRECONDITION"),
            Self::Runtime => write!(f, "RUNTIME"),
            Self::ExternalTool => write!(f, "EXTERNAL_TOOL"),
        }
    }
}

/// A fatal condition that terminates the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProvisionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProvisionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn user_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UserInput, message)
    }

    pub fn privilege(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Privilege, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn external_tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalTool, message)
    }
}
