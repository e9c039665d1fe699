//! Configuration type definitions for the pipeline
//!
//! Every section is optional in YAML; an empty document yields the
//! platform defaults. Values are fixed once the coordinator is built, and no
//! part of a request can change them.

use crate::errors::KilnError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KilnConfig {
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The external compiler and the flags it is always invoked with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_compiler")]
    pub compiler: String,
    #[serde(default = "default_include_dirs")]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default = "default_library_dirs")]
    pub library_dirs: Vec<PathBuf>,
    #[serde(default = "default_libraries")]
    pub libraries: Vec<String>,
    #[serde(default = "default_source_file")]
    pub source_file: String,
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
}

impl ToolchainConfig {
    /// Flags appended after `<source> -o <artifact>`.
    pub fn compile_flags(&self) -> Vec<String> {
        let includes = self
            .include_dirs
            .iter()
            .map(|dir| format!("-I{}", dir.display()));
        let lib_dirs = self
            .library_dirs
            .iter()
            .map(|dir| format!("-L{}", dir.display()));
        let libs = self.libraries.iter().map(|lib| format!("-l{}", lib));
        includes.chain(lib_dirs).chain(libs).collect()
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            include_dirs: default_include_dirs(),
            library_dirs: default_library_dirs(),
            libraries: default_libraries(),
            source_file: default_source_file(),
            artifact_name: default_artifact_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_compile_timeout")]
    pub compile_timeout_secs: u64,
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl LimitsConfig {
    pub fn compile_deadline(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_timeout_secs: default_compile_timeout(),
            run_timeout_secs: default_run_timeout(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Parent directory for workspaces; the system temp dir when unset.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_workspace_prefix")]
    pub prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: default_workspace_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Maximum buffered events per session while no consumer is attached.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_ms: u64,
    /// Sessions kept in the buffer at once; the oldest finished one is evicted first.
    #[serde(default = "default_max_buffered_sessions")]
    pub max_buffered_sessions: usize,
}

impl RelayConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            delivery_timeout_ms: default_delivery_timeout(),
            max_buffered_sessions: default_max_buffered_sessions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunnerConfig {
    /// Variables added on top of the inherited environment.
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl KilnConfig {
    pub fn validate(&self) -> Result<(), KilnError> {
        if self.toolchain.compiler.trim().is_empty() {
            return Err(KilnError::ConfigError(
                "Toolchain compiler cannot be empty".to_string(),
            ));
        }

        for (field, name) in [
            ("source_file", &self.toolchain.source_file),
            ("artifact_name", &self.toolchain.artifact_name),
        ] {
            if !is_plain_file_name(name) {
                return Err(KilnError::ConfigError(format!(
                    "Toolchain {} '{}' must be a plain file name",
                    field, name
                )));
            }
        }

        if self.toolchain.source_file == self.toolchain.artifact_name {
            return Err(KilnError::ConfigError(
                "Toolchain source_file and artifact_name must differ".to_string(),
            ));
        }

        if self.limits.compile_timeout_secs == 0 {
            return Err(KilnError::ConfigError(
                "Compile timeout must be greater than 0".to_string(),
            ));
        }

        if self.limits.run_timeout_secs == 0 {
            return Err(KilnError::ConfigError(
                "Run timeout must be greater than 0".to_string(),
            ));
        }

        if self.limits.max_concurrent == 0 {
            return Err(KilnError::ConfigError(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }

        if self.relay.buffer_capacity == 0 {
            return Err(KilnError::ConfigError(
                "Relay buffer_capacity must be greater than 0".to_string(),
            ));
        }

        if self.relay.delivery_timeout_ms == 0 {
            return Err(KilnError::ConfigError(
                "Relay delivery_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.relay.max_buffered_sessions == 0 {
            return Err(KilnError::ConfigError(
                "Relay max_buffered_sessions must be greater than 0".to_string(),
            ));
        }

        if self.workspace.prefix.contains(&['/', '\\'][..]) {
            return Err(KilnError::ConfigError(format!(
                "Workspace prefix '{}' cannot contain path separators",
                self.workspace.prefix
            )));
        }

        Ok(())
    }
}

pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(&['/', '\\'][..])
}

fn default_compiler() -> String {
    "gcc".to_string()
}

#[cfg(windows)]
fn default_include_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from(r"C:\GooeyGUI\include")]
}

#[cfg(not(windows))]
fn default_include_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/include/Gooey"),
        PathBuf::from("/usr/local/include/GLPS"),
    ]
}

#[cfg(windows)]
fn default_library_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from(r"C:\GooeyGUI\lib")]
}

#[cfg(not(windows))]
fn default_library_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("/usr/local/lib")]
}

#[cfg(windows)]
fn default_libraries() -> Vec<String> {
    vec!["GooeyGUI".to_string()]
}

#[cfg(not(windows))]
fn default_libraries() -> Vec<String> {
    vec!["GooeyGUI-1".to_string(), "GLPS".to_string()]
}

fn default_source_file() -> String {
    "gui_app.c".to_string()
}

fn default_artifact_name() -> String {
    format!("gui_app{}", std::env::consts::EXE_SUFFIX)
}

fn default_compile_timeout() -> u64 { 30 }
fn default_run_timeout() -> u64 { 10 }
fn default_max_concurrent() -> usize { 4 }
fn default_buffer_capacity() -> usize { 1000 }
fn default_delivery_timeout() -> u64 { 5000 }
fn default_max_buffered_sessions() -> usize { 64 }
fn default_workspace_prefix() -> String { "kiln-".to_string() }
fn default_log_level() -> String { "info".to_string() }
