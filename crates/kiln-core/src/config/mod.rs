//! Configuration system for the pipeline
//!
//! Loads YAML configuration, applies environment overrides and validates the
//! result before anything is spawned.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;

#[cfg(test)]
mod tests;
