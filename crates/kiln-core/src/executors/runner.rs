//! Execution of a compiled artifact.

use super::process::supervise;
use super::{LineSink, ProcessOutcome};
use crate::errors::ExecutionError;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct Runner {
    environment: HashMap<String, String>,
}

impl Runner {
    /// `environment` is layered over the inherited process environment.
    pub fn new(environment: HashMap<String, String>) -> Self {
        Self { environment }
    }

    /// Run `artifact` inside `workspace`, streaming its output to `sink`.
    ///
    /// Returns the exit code of a process that terminated on its own, whatever
    /// its value. Deadline expiry and cancellation kill the process and are
    /// reported as errors carrying the code observed after the kill.
    pub async fn run<S: LineSink + ?Sized>(
        &self,
        artifact: &Path,
        workspace: &Path,
        deadline: Duration,
        cancel: &CancellationToken,
        sink: &mut S,
    ) -> Result<i32, ExecutionError> {
        let mut command = Command::new(artifact);
        command.current_dir(workspace).envs(&self.environment);

        log::debug!("Running {}", artifact.display());

        let outcome = supervise(command, deadline, cancel, sink)
            .await
            .map_err(|e| {
                ExecutionError::UnexpectedFault(format!(
                    "Failed to launch {}: {}",
                    artifact.display(),
                    e
                ))
            })?;

        match outcome {
            ProcessOutcome::Exited { exit_code } => Ok(exit_code),
            ProcessOutcome::TimedOut { exit_code } => Err(ExecutionError::ExecutionTimeout {
                after: deadline,
                exit_code,
            }),
            ProcessOutcome::Cancelled { exit_code } => Err(ExecutionError::Cancelled { exit_code }),
        }
    }
}
