//! Compile-and-run pipeline for submitted C programs.
//!
//! A request carries source text. The pipeline writes it into a fresh
//! workspace, invokes a fixed external toolchain, runs the resulting binary
//! under a deadline, and streams every line it produces as a correlated
//! [`OutputEvent`](kiln_types::OutputEvent) through a single relay.
//!
//! # Architecture Overview
//!
//! - **Coordinator**: drives one session through its state machine and maps every outcome to a result
//! - **Executors**: process supervision shared by the compile and run phases
//! - **Relay**: ordered, buffered delivery of events to at most one consumer
//! - **Workspace**: scoped temporary directories released on every exit path
//! - **Configuration**: YAML file with defaults and environment overrides

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod executors;
pub mod relay;
pub mod session;
pub mod workspace;

pub use config::*;
pub use coordinator::ExecutionCoordinator;
pub use errors::{ExecutionError, KilnError};
pub use executors::{Compiler, Runner};
pub use relay::{EventConsumer, OutputRelay};
pub use session::{CorrelationIdGenerator, ExecutionSession, SessionState, Trigger};
pub use workspace::{Workspace, WorkspaceManager};

pub use kiln_types;
