//! Error types for the compile-and-run pipeline
//!
//! Two layers are used. [`KilnError`] covers setup concerns (configuration,
//! I/O during startup, state machine misuse) and is what constructors and the
//! config loader return. [`ExecutionError`] classifies how a single session
//! ended; the coordinator turns every variant into relay events and an
//! `ExecutionResult`, so none of them ever reaches the caller as an error.

use crate::session::SessionState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum KilnError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Workspace error: {0}")]
    WorkspaceError(String),
    #[error("Invalid session transition from {from:?} on {trigger}")]
    InvalidTransition { from: SessionState, trigger: String },
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for KilnError {
    fn from(err: std::io::Error) -> Self {
        KilnError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for KilnError {
    fn from(err: serde_yaml::Error) -> Self {
        KilnError::ConfigError(format!("Failed to parse YAML config: {}", err))
    }
}

/// How one phase of a session failed.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Workspace error: {0}")]
    Workspace(String),
    #[error("Compilation failed with exit code {exit_code}")]
    CompileFailed {
        exit_code: i32,
        diagnostics: Vec<String>,
    },
    #[error("Compilation timed out after {}s", after.as_secs())]
    CompileTimeout { after: Duration },
    #[error("Program execution timed out after {}s", after.as_secs())]
    ExecutionTimeout {
        after: Duration,
        exit_code: Option<i32>,
    },
    #[error("Program exited with code {exit_code}")]
    RuntimeFailure { exit_code: i32 },
    #[error("Execution cancelled")]
    Cancelled { exit_code: Option<i32> },
    #[error("Unexpected error: {0}")]
    UnexpectedFault(String),
}

impl ExecutionError {
    /// The exit code of a process that ran in the run phase, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::RuntimeFailure { exit_code } => Some(*exit_code),
            ExecutionError::ExecutionTimeout { exit_code, .. }
            | ExecutionError::Cancelled { exit_code } => *exit_code,
            _ => None,
        }
    }

    /// Short machine-readable name of the failure class.
    pub fn error_type(&self) -> &'static str {
        match self {
            ExecutionError::Workspace(_) => "workspace_error",
            ExecutionError::CompileFailed { .. } => "compile_failed",
            ExecutionError::CompileTimeout { .. } => "compile_timeout",
            ExecutionError::ExecutionTimeout { .. } => "execution_timeout",
            ExecutionError::RuntimeFailure { .. } => "runtime_failure",
            ExecutionError::Cancelled { .. } => "cancelled",
            ExecutionError::UnexpectedFault(_) => "unexpected_fault",
        }
    }
}

impl From<KilnError> for ExecutionError {
    fn from(err: KilnError) -> Self {
        match err {
            KilnError::WorkspaceError(msg) => ExecutionError::Workspace(msg),
            other => ExecutionError::UnexpectedFault(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::UnexpectedFault(err.to_string())
    }
}
