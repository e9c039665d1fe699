//! Request, result and identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token tagging every event and the result of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is blank.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Consume the identifier, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A program submitted for compilation and execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Raw source text, written verbatim to the workspace.
    pub source: String,
}

impl ExecutionRequest {
    /// Create a new request.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Terminal outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// True only when the program ran and exited with code 0.
    pub success: bool,
    /// Present iff the run phase started.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_code: Option<i32>,
    /// The session the result belongs to.
    pub correlation_id: CorrelationId,
}

impl ExecutionResult {
    /// A failure that never reached the run phase.
    pub fn failure(correlation_id: CorrelationId) -> Self {
        Self {
            success: false,
            exit_code: None,
            correlation_id,
        }
    }

    /// A run that completed with the given exit code.
    pub fn exited(correlation_id: CorrelationId, exit_code: i32) -> Self {
        Self {
            success: exit_code == 0,
            exit_code: Some(exit_code),
            correlation_id,
        }
    }

    /// A run that was started but forcibly terminated.
    pub fn terminated(correlation_id: CorrelationId, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            exit_code,
            correlation_id,
        }
    }
}

/// Liveness check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub status: String,
}

impl Default for Ping {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
