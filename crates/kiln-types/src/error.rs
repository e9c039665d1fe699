//! Errors raised while interpreting wire values.

use thiserror::Error;

/// Errors produced when converting untyped input into kiln types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypesError {
    /// The event kind string is not one of the known kinds.
    #[error("Unknown event kind '{0}' (expected one of: system, stdout, stderr, error, exit)")]
    UnknownEventKind(String),
}
