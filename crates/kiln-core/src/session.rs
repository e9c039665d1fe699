//! Per-request session state: correlation identifier, lifecycle state machine
//! and event sequencing.

use crate::errors::KilnError;
use kiln_types::{CorrelationId, EventKind, OutputEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifecycle states of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Compiling,
    CompileFailed,
    CompileOk,
    Running,
    TimedOut,
    Completed,
    Cancelled,
    Faulted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::CompileFailed
                | SessionState::TimedOut
                | SessionState::Completed
                | SessionState::Cancelled
                | SessionState::Faulted
        )
    }
}

/// What happened to move a session forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    CompileInvoked,
    ToolchainFailed,
    ToolchainSucceeded,
    CompileDeadlineExceeded,
    ArtifactLaunched,
    ProcessExited,
    RunDeadlineExceeded,
    Cancel,
    Fault,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::CompileInvoked => "compile invoked",
            Trigger::ToolchainFailed => "toolchain exit != 0",
            Trigger::ToolchainSucceeded => "toolchain exit = 0",
            Trigger::CompileDeadlineExceeded => "compile deadline exceeded",
            Trigger::ArtifactLaunched => "artifact launched",
            Trigger::ProcessExited => "process exits",
            Trigger::RunDeadlineExceeded => "run deadline exceeded",
            Trigger::Cancel => "cancellation",
            Trigger::Fault => "fault",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// Apply a trigger, returning the next state.
    pub fn next(self, trigger: Trigger) -> Result<SessionState, KilnError> {
        use SessionState::*;
        use Trigger::*;

        let next = match (self, trigger) {
            (state, Cancel) if !state.is_terminal() => Cancelled,
            (state, Fault) if !state.is_terminal() => Faulted,
            (Created, CompileInvoked) => Compiling,
            (Compiling, ToolchainFailed) => CompileFailed,
            (Compiling, ToolchainSucceeded) => CompileOk,
            (Compiling, CompileDeadlineExceeded) => CompileFailed,
            (CompileOk, ArtifactLaunched) => Running,
            (Running, ProcessExited) => Completed,
            (Running, RunDeadlineExceeded) => TimedOut,
            (from, trigger) => {
                return Err(KilnError::InvalidTransition {
                    from,
                    trigger: trigger.to_string(),
                })
            }
        };
        Ok(next)
    }
}

/// Generates identifiers that stay unique for requests arriving in the same
/// millisecond: `<unix millis>-<process-wide counter>`.
#[derive(Debug, Default)]
pub struct CorrelationIdGenerator {
    counter: AtomicU64,
}

impl CorrelationIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> CorrelationId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let millis = chrono::Utc::now().timestamp_millis();
        CorrelationId::from(format!("{}-{}", millis, seq))
    }
}

/// State owned by one coordinator invocation.
#[derive(Debug)]
pub struct ExecutionSession {
    id: CorrelationId,
    workspace: Option<PathBuf>,
    state: SessionState,
    next_sequence: u64,
}

impl ExecutionSession {
    pub fn new(id: CorrelationId) -> Self {
        Self {
            id,
            workspace: None,
            state: SessionState::Created,
            next_sequence: 0,
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn workspace(&self) -> Option<&PathBuf> {
        self.workspace.as_ref()
    }

    pub fn set_workspace(&mut self, path: PathBuf) {
        self.workspace = Some(path);
    }

    pub fn advance(&mut self, trigger: Trigger) -> Result<SessionState, KilnError> {
        let next = self.state.next(trigger)?;
        log::debug!(
            "Session {}: {:?} -> {:?} ({})",
            self.id,
            self.state,
            next,
            trigger
        );
        self.state = next;
        Ok(next)
    }

    /// Build the next event of this session, stamped with its sequence number.
    pub fn event(&mut self, kind: EventKind, line: impl Into<String>) -> OutputEvent {
        let event = OutputEvent::new(kind, line, self.id.clone()).with_sequence(self.next_sequence);
        self.next_sequence += 1;
        event
    }
}
