//! Invocation of the external toolchain.
//!
//! The command line is `<compiler> <source> -o <artifact> <flags...>`, where
//! the flags come from [`ToolchainConfig`] at construction time. Nothing from
//! a request reaches the argument list other than the two workspace paths, and
//! no shell is involved.

use super::process::supervise;
use super::{CollectedOutput, ProcessOutcome};
use crate::config::types::ToolchainConfig;
use crate::errors::ExecutionError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use which::which;

#[derive(Debug, Clone)]
pub struct Compiler {
    program: PathBuf,
    flags: Vec<String>,
}

impl Compiler {
    /// Resolve the compiler on `PATH` and freeze its flags.
    pub fn new(config: &ToolchainConfig) -> Self {
        let program = match which(&config.compiler) {
            Ok(path) => {
                log::info!("Using compiler {}", path.display());
                path
            }
            Err(e) => {
                log::warn!(
                    "Compiler '{}' could not be resolved ({}); executions will fail until it is installed",
                    config.compiler,
                    e
                );
                PathBuf::from(&config.compiler)
            }
        };

        Self {
            program,
            flags: config.compile_flags(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments passed to the compiler for the given paths.
    pub fn arguments(&self, source: &Path, artifact: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            source.as_os_str().to_owned(),
            OsString::from("-o"),
            artifact.as_os_str().to_owned(),
        ];
        args.extend(self.flags.iter().map(OsString::from));
        args
    }

    /// Compile `source` into `artifact`, with `workspace` as working directory.
    pub async fn compile(
        &self,
        source: &Path,
        artifact: &Path,
        workspace: &Path,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, ExecutionError> {
        let mut command = Command::new(&self.program);
        command
            .args(self.arguments(source, artifact))
            .current_dir(workspace);

        log::debug!(
            "Compiling {} with {}",
            source.display(),
            self.program.display()
        );

        let mut output = CollectedOutput::default();
        let outcome = supervise(command, deadline, cancel, &mut output)
            .await
            .map_err(|e| {
                ExecutionError::UnexpectedFault(format!(
                    "Failed to start compiler {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        match outcome {
            ProcessOutcome::Exited { exit_code: 0 } => {
                if tokio::fs::try_exists(artifact).await.unwrap_or(false) {
                    Ok(artifact.to_path_buf())
                } else {
                    Err(ExecutionError::UnexpectedFault(format!(
                        "Compiler reported success but {} was not produced",
                        artifact.display()
                    )))
                }
            }
            ProcessOutcome::Exited { exit_code } => Err(ExecutionError::CompileFailed {
                exit_code,
                diagnostics: output.into_combined(),
            }),
            ProcessOutcome::TimedOut { .. } => {
                Err(ExecutionError::CompileTimeout { after: deadline })
            }
            ProcessOutcome::Cancelled { .. } => Err(ExecutionError::Cancelled { exit_code: None }),
        }
    }
}
