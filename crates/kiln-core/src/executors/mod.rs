//! Child-process execution for the compile and run phases.
//!
//! Both phases share one supervision loop ([`process`]): spawn with piped
//! output, stream lines to a [`LineSink`] as they are produced, and race the
//! child's exit against a deadline and a cancellation token. The compiler
//! collects lines for its diagnostics; the runner forwards them live.

use async_trait::async_trait;

pub mod compiler;
pub mod process;
pub mod runner;

pub use compiler::Compiler;
pub use runner::Runner;

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited { exit_code: i32 },
    TimedOut { exit_code: Option<i32> },
    Cancelled { exit_code: Option<i32> },
}

/// Receives output lines while a process runs.
#[async_trait]
pub trait LineSink: Send {
    async fn on_line(&mut self, stream: OutputStream, line: String);
}

/// Keeps both streams as separate line sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CollectedOutput {
    /// stdout lines followed by stderr lines.
    pub fn into_combined(self) -> Vec<String> {
        let mut lines = self.stdout;
        lines.extend(self.stderr);
        lines
    }
}

#[async_trait]
impl LineSink for CollectedOutput {
    async fn on_line(&mut self, stream: OutputStream, line: String) {
        match stream {
            OutputStream::Stdout => self.stdout.push(line),
            OutputStream::Stderr => self.stderr.push(line),
        }
    }
}
