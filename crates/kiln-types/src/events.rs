//! Event types streamed while a submission is compiled and run.

use crate::error::TypesError;
use crate::types::CorrelationId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of an output event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Lifecycle progress produced by the pipeline itself.
    System,
    /// A line the program wrote to standard output.
    Stdout,
    /// A line the program (or the compiler) wrote to standard error.
    Stderr,
    /// A failure summary: compile failure, timeout, non-zero exit, fault.
    Error,
    /// The program exited with code 0.
    Exit,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 5] = [
        EventKind::System,
        EventKind::Stdout,
        EventKind::Stderr,
        EventKind::Error,
        EventKind::Exit,
    ];

    /// The lowercase wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::System => "system",
            EventKind::Stdout => "stdout",
            EventKind::Stderr => "stderr",
            EventKind::Error => "error",
            EventKind::Exit => "exit",
        }
    }

    /// Whether this kind closes a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Error | EventKind::Exit)
    }
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Stdout
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| TypesError::UnknownEventKind(s.to_string()))
    }
}

/// A unit of observable progress for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    /// The kind of the event.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// One line of text, without its trailing newline.
    pub line: String,
    /// The session this event belongs to.
    #[serde(rename = "processId")]
    pub correlation_id: CorrelationId,
    /// Milliseconds since the Unix epoch, stamped when the event is emitted.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<i64>,
    /// Position of the event within its session, starting at 0.
    #[serde(default)]
    pub sequence: u64,
}

impl OutputEvent {
    /// Create a new event.
    pub fn new(kind: EventKind, line: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            kind,
            line: line.into(),
            correlation_id,
            timestamp: None,
            sequence: 0,
        }
    }

    /// Create a `system` event.
    pub fn system(line: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::new(EventKind::System, line, correlation_id)
    }

    /// Create a `stdout` event.
    pub fn stdout(line: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::new(EventKind::Stdout, line, correlation_id)
    }

    /// Create a `stderr` event.
    pub fn stderr(line: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::new(EventKind::Stderr, line, correlation_id)
    }

    /// Create an `error` event.
    pub fn error(line: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::new(EventKind::Error, line, correlation_id)
    }

    /// Create an `exit` event.
    pub fn exit(line: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self::new(EventKind::Exit, line, correlation_id)
    }

    /// Set the per-session sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the emission timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Render the event the way the console log prints it.
    pub fn console_line(&self) -> String {
        format!(
            "[{}][PID:{}] {}",
            self.kind.as_str().to_ascii_uppercase(),
            self.correlation_id,
            self.line
        )
    }
}
