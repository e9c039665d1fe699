//! Supervision loop shared by the compiler and the runner.

use super::{LineSink, OutputStream, ProcessOutcome};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

/// How long to keep reading pipes after the child is gone. A grandchild that
/// inherited the pipes can otherwise hold them open indefinitely. Only reading
/// is bounded; lines already read are always forwarded.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

enum Stop {
    Exited(ExitStatus),
    Deadline,
    Cancelled,
}

struct Pipes {
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    stdout_open: bool,
    stderr_open: bool,
}

impl Pipes {
    fn is_open(&self) -> bool {
        self.stdout_open || self.stderr_open
    }

    async fn forward<S: LineSink + ?Sized>(
        stream: OutputStream,
        line: io::Result<Option<String>>,
        open: &mut bool,
        sink: &mut S,
    ) {
        match line {
            Ok(Some(line)) => sink.on_line(stream, line).await,
            Ok(None) => *open = false,
            Err(e) => {
                log::warn!("Failed to read child {:?}: {}", stream, e);
                *open = false;
            }
        }
    }

    /// Read whatever is left in the pipes into `pending` until both close.
    async fn read_remaining(&mut self, pending: &mut Vec<(OutputStream, String)>) {
        while self.is_open() {
            let (stream, line) = tokio::select! {
                line = self.stdout.next_line(), if self.stdout_open => (OutputStream::Stdout, line),
                line = self.stderr.next_line(), if self.stderr_open => (OutputStream::Stderr, line),
            };
            match line {
                Ok(Some(line)) => pending.push((stream, line)),
                Ok(None) => self.close(stream),
                Err(e) => {
                    log::warn!("Failed to read child {:?}: {}", stream, e);
                    self.close(stream);
                }
            }
        }
    }

    fn close(&mut self, stream: OutputStream) {
        match stream {
            OutputStream::Stdout => self.stdout_open = false,
            OutputStream::Stderr => self.stderr_open = false,
        }
    }
}

/// Spawn `command` and supervise it until it exits, the deadline passes, or
/// `cancel` fires. On deadline or cancellation the child is killed and reaped.
pub async fn supervise<S: LineSink + ?Sized>(
    mut command: Command,
    deadline: Duration,
    cancel: &CancellationToken,
    sink: &mut S,
) -> io::Result<ProcessOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stderr was not captured"))?;

    let mut pipes = Pipes {
        stdout: BufReader::new(stdout).lines(),
        stderr: BufReader::new(stderr).lines(),
        stdout_open: true,
        stderr_open: true,
    };

    let timer = tokio::time::sleep(deadline);
    tokio::pin!(timer);

    let stop = loop {
        tokio::select! {
            line = pipes.stdout.next_line(), if pipes.stdout_open => {
                Pipes::forward(OutputStream::Stdout, line, &mut pipes.stdout_open, sink).await
            }
            line = pipes.stderr.next_line(), if pipes.stderr_open => {
                Pipes::forward(OutputStream::Stderr, line, &mut pipes.stderr_open, sink).await
            }
            status = child.wait() => break Stop::Exited(status?),
            _ = &mut timer => break Stop::Deadline,
            _ = cancel.cancelled() => break Stop::Cancelled,
        }
    };

    let outcome = match stop {
        Stop::Exited(status) => ProcessOutcome::Exited {
            exit_code: exit_code(&status),
        },
        Stop::Deadline => {
            log::warn!("Process exceeded its {:?} deadline; killing it", deadline);
            ProcessOutcome::TimedOut {
                exit_code: terminate(&mut child).await,
            }
        }
        Stop::Cancelled => {
            log::info!("Process cancelled; killing it");
            ProcessOutcome::Cancelled {
                exit_code: terminate(&mut child).await,
            }
        }
    };

    let mut pending = Vec::new();
    if tokio::time::timeout(DRAIN_GRACE, pipes.read_remaining(&mut pending))
        .await
        .is_err()
    {
        log::warn!(
            "Output pipes still open {:?} after the process ended; truncating",
            DRAIN_GRACE
        );
    }
    for (stream, line) in pending {
        sink.on_line(stream, line).await;
    }

    Ok(outcome)
}

async fn terminate(child: &mut Child) -> Option<i32> {
    if let Err(e) = child.kill().await {
        log::warn!("Failed to kill child process: {}", e);
    }
    match child.try_wait() {
        Ok(Some(status)) => Some(exit_code(&status)),
        Ok(None) => None,
        Err(e) => {
            log::warn!("Failed to reap child process: {}", e);
            None
        }
    }
}

/// Numeric exit code; on Unix a signal death is reported as the negated signal.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}
