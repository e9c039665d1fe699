//! Orchestration of one request through workspace, compile, run and relay
//!
//! The coordinator is the single entry point for callers. Each call to
//! [`ExecutionCoordinator::execute`] owns its session, workspace and child
//! processes; the only state shared between calls is the relay, the slot
//! semaphore and the registry of cancellation tokens. Every failure is turned
//! into relay events plus an [`ExecutionResult`], and the workspace is
//! released on every path, including a dropped future.

use crate::config::types::KilnConfig;
use crate::errors::{ExecutionError, KilnError};
use crate::executors::{Compiler, LineSink, OutputStream, Runner};
use crate::relay::{EventConsumer, OutputRelay};
use crate::session::{CorrelationIdGenerator, ExecutionSession, Trigger};
use crate::workspace::{Workspace, WorkspaceManager};
use async_trait::async_trait;
use kiln_types::{CorrelationId, EventKind, ExecutionRequest, ExecutionResult, OutputEvent, Ping};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

pub struct ExecutionCoordinator {
    config: Arc<KilnConfig>,
    relay: Arc<OutputRelay>,
    workspaces: WorkspaceManager,
    compiler: Compiler,
    runner: Runner,
    ids: CorrelationIdGenerator,
    slots: Arc<Semaphore>,
    live: Mutex<HashMap<CorrelationId, CancellationToken>>,
}

impl ExecutionCoordinator {
    /// Build a coordinator with its own relay.
    pub fn new(config: KilnConfig) -> Result<Self, KilnError> {
        let relay = Arc::new(OutputRelay::new(&config.relay));
        Self::with_relay(config, relay)
    }

    /// Build a coordinator that emits into an existing relay.
    pub fn with_relay(config: KilnConfig, relay: Arc<OutputRelay>) -> Result<Self, KilnError> {
        config.validate()?;

        let compiler = Compiler::new(&config.toolchain);
        let runner = Runner::new(config.runner.environment.clone());
        let workspaces = WorkspaceManager::new(&config.workspace);
        let slots = Arc::new(Semaphore::new(config.limits.max_concurrent));

        log::info!(
            "Execution coordinator ready: compile deadline {:?}, run deadline {:?}, {} slot(s), workspaces under {}",
            config.limits.compile_deadline(),
            config.limits.run_deadline(),
            config.limits.max_concurrent,
            workspaces.root().display()
        );

        Ok(Self {
            config: Arc::new(config),
            relay,
            workspaces,
            compiler,
            runner,
            ids: CorrelationIdGenerator::new(),
            slots,
            live: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    pub fn relay(&self) -> &Arc<OutputRelay> {
        &self.relay
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Trivial liveness check.
    pub fn ping(&self) -> Ping {
        Ping::default()
    }

    /// Attach the consumer that receives every session's events.
    pub async fn attach_consumer(&self, consumer: EventConsumer) -> bool {
        self.relay.attach(consumer).await
    }

    /// Inject an out-of-band event; a blank or missing id gets a fresh one.
    pub async fn log_external(
        &self,
        message: impl Into<String>,
        kind: EventKind,
        correlation_id: Option<CorrelationId>,
    ) -> CorrelationId {
        let id = correlation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.ids.next_id());
        self.relay
            .emit(OutputEvent::new(kind, message, id.clone()))
            .await;
        id
    }

    /// Cancel a running session. Returns false if no such session is live.
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        match live.get(correlation_id) {
            Some(token) => {
                log::info!("Cancellation requested for session {}", correlation_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Identifiers of sessions currently in flight.
    pub fn live_sessions(&self) -> Vec<CorrelationId> {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.keys().cloned().collect()
    }

    /// Compile and run one program.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Compile and run one program; `cancel` aborts it at any point.
    pub async fn execute_with_cancellation(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let id = self.ids.next_id();
        let _registration = self.register(&id, &cancel);
        let mut session = ExecutionSession::new(id.clone());
        let started = Instant::now();

        log::info!("Session {}: starting execution", id);
        self.emit(&mut session, EventKind::System, "Starting execution")
            .await;

        let mut workspace: Option<Workspace> = None;
        let outcome = self
            .drive(&mut session, &request, &cancel, &mut workspace)
            .await;
        let result = self.conclude(&mut session, outcome).await;

        if let Some(mut workspace) = workspace.take() {
            workspace.release();
        }

        log::info!(
            "Session {}: finished as {:?} in {:?} (success: {}, exit code: {:?})",
            id,
            session.state(),
            started.elapsed(),
            result.success,
            result.exit_code
        );
        result
    }

    async fn drive(
        &self,
        session: &mut ExecutionSession,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
        slot: &mut Option<Workspace>,
    ) -> Result<i32, ExecutionError> {
        let _permit = self.acquire_slot(cancel).await?;

        let workspace = slot.insert(self.workspaces.acquire()?);
        session.set_workspace(workspace.path().to_path_buf());

        let toolchain = &self.config.toolchain;
        let source = workspace
            .materialize(&toolchain.source_file, &request.source)
            .await?;
        let artifact = workspace.file(&toolchain.artifact_name);

        session.advance(Trigger::CompileInvoked)?;
        let compiled = self
            .compiler
            .compile(
                &source,
                &artifact,
                workspace.path(),
                self.config.limits.compile_deadline(),
                cancel,
            )
            .await;

        let artifact = match compiled {
            Ok(artifact) => artifact,
            Err(ExecutionError::CompileFailed {
                exit_code,
                diagnostics,
            }) => {
                session.advance(Trigger::ToolchainFailed)?;
                for line in &diagnostics {
                    self.emit(session, EventKind::Stderr, line.as_str()).await;
                }
                return Err(ExecutionError::CompileFailed {
                    exit_code,
                    diagnostics,
                });
            }
            Err(err @ ExecutionError::CompileTimeout { .. }) => {
                session.advance(Trigger::CompileDeadlineExceeded)?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        session.advance(Trigger::ToolchainSucceeded)?;
        self.emit(session, EventKind::System, "Compilation succeeded")
            .await;

        session.advance(Trigger::ArtifactLaunched)?;
        let run = {
            let mut sink = SessionSink {
                session: &mut *session,
                relay: self.relay.as_ref(),
            };
            self.runner
                .run(
                    &artifact,
                    workspace.path(),
                    self.config.limits.run_deadline(),
                    cancel,
                    &mut sink,
                )
                .await
        };

        match run {
            Ok(exit_code) => {
                session.advance(Trigger::ProcessExited)?;
                if exit_code == 0 {
                    Ok(exit_code)
                } else {
                    Err(ExecutionError::RuntimeFailure { exit_code })
                }
            }
            Err(err @ ExecutionError::ExecutionTimeout { .. }) => {
                session.advance(Trigger::RunDeadlineExceeded)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Emit the terminal lifecycle event and build the result.
    async fn conclude(
        &self,
        session: &mut ExecutionSession,
        outcome: Result<i32, ExecutionError>,
    ) -> ExecutionResult {
        let id = session.id().clone();

        match outcome {
            Ok(exit_code) => {
                self.emit(
                    session,
                    EventKind::Exit,
                    format!("Program exited with code {}", exit_code),
                )
                .await;
                ExecutionResult::exited(id, exit_code)
            }
            Err(err) => {
                if !session.state().is_terminal() {
                    let trigger = match err {
                        ExecutionError::Cancelled { .. } => Trigger::Cancel,
                        _ => Trigger::Fault,
                    };
                    if let Err(e) = session.advance(trigger) {
                        log::error!("Session {}: {}", id, e);
                    }
                }

                match &err {
                    ExecutionError::UnexpectedFault(_) | ExecutionError::Workspace(_) => {
                        log::error!("Session {}: {}", id, err)
                    }
                    _ => log::info!("Session {}: {}", id, err),
                }

                self.emit(session, EventKind::Error, err.to_string()).await;
                ExecutionResult::terminated(id, err.exit_code())
            }
        }
    }

    async fn acquire_slot(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, ExecutionError> {
        tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => permit.map_err(|_| {
                ExecutionError::UnexpectedFault("Execution slots are closed".to_string())
            }),
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled { exit_code: None }),
        }
    }

    async fn emit(&self, session: &mut ExecutionSession, kind: EventKind, line: impl Into<String>) {
        self.relay.emit(session.event(kind, line)).await;
    }

    fn register(&self, id: &CorrelationId, cancel: &CancellationToken) -> Registration<'_> {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.insert(id.clone(), cancel.clone());
        Registration {
            live: &self.live,
            id: id.clone(),
        }
    }
}

/// Removes a session's cancellation token when the session ends.
struct Registration<'a> {
    live: &'a Mutex<HashMap<CorrelationId, CancellationToken>>,
    id: CorrelationId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.remove(&self.id);
    }
}

/// Forwards runner output to the relay as session events.
struct SessionSink<'a> {
    session: &'a mut ExecutionSession,
    relay: &'a OutputRelay,
}

#[async_trait]
impl LineSink for SessionSink<'_> {
    async fn on_line(&mut self, stream: OutputStream, line: String) {
        let kind = match stream {
            OutputStream::Stdout => EventKind::Stdout,
            OutputStream::Stderr => EventKind::Stderr,
        };
        self.relay.emit(self.session.event(kind, line)).await;
    }
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("compiler", &self.compiler.program())
            .field("active_workspaces", &self.workspaces.active())
            .field("available_slots", &self.slots.available_permits())
            .finish()
    }
}
