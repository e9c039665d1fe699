//! Type definitions shared between the execution pipeline and its consumers
//!
//! This crate holds the contract between the pipeline that compiles and runs
//! submitted programs and whatever renders its progress (an SSE subscriber, a
//! terminal printer, a test harness). Keeping the types here lets the server
//! and the core evolve independently while agreeing on the wire format.
//!
//! ## Features
//!
//! - **Typed events**: every line of output is an [`OutputEvent`] with an [`EventKind`]
//! - **Correlation**: every event and result carries the [`CorrelationId`] of its session
//! - **Serde support**: JSON field names match the front-end console protocol
//!
//! ## Example
//!
//! ```rust
//! use kiln_types::{CorrelationId, EventKind, OutputEvent};
//!
//! let id = CorrelationId::from("1700000000000-1");
//! let event = OutputEvent::new(EventKind::Stdout, "Hello", id.clone());
//!
//! assert_eq!(event.kind, EventKind::Stdout);
//! assert_eq!(event.correlation_id, id);
//! ```

pub mod error;
pub mod events;
pub mod types;

pub use error::*;
pub use events::*;
pub use types::*;
