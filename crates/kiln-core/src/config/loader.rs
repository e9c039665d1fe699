//! Configuration loader for YAML files and environment overrides
//!
//! Values are read once at startup. Environment variables take precedence over
//! the file so a deployment can adjust deadlines without editing YAML.

use crate::config::types::KilnConfig;
use crate::errors::KilnError;
use std::env;
use std::path::Path;
use tokio::fs;

pub const ENV_COMPILER: &str = "KILN_COMPILER";
pub const ENV_COMPILE_TIMEOUT: &str = "KILN_COMPILE_TIMEOUT_SECS";
pub const ENV_RUN_TIMEOUT: &str = "KILN_RUN_TIMEOUT_SECS";
pub const ENV_MAX_CONCURRENT: &str = "KILN_MAX_CONCURRENT";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<KilnConfig, KilnError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            KilnError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load the file if it exists, otherwise start from defaults.
    pub async fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<KilnConfig, KilnError> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            log::info!("Loading configuration from file: {}", path.display());
            Self::from_file(path).await
        } else {
            log::info!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
            Self::from_str("")
        }
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<KilnConfig, KilnError> {
        let mut config: KilnConfig = if content.trim().is_empty() {
            KilnConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(config: &mut KilnConfig) -> Result<(), KilnError> {
        if let Ok(compiler) = env::var(ENV_COMPILER) {
            if !compiler.trim().is_empty() {
                log::debug!("Compiler overridden by {}: {}", ENV_COMPILER, compiler);
                config.toolchain.compiler = compiler;
            }
        }

        if let Some(secs) = Self::env_number::<u64>(ENV_COMPILE_TIMEOUT)? {
            config.limits.compile_timeout_secs = secs;
        }

        if let Some(secs) = Self::env_number::<u64>(ENV_RUN_TIMEOUT)? {
            config.limits.run_timeout_secs = secs;
        }

        if let Some(max) = Self::env_number::<usize>(ENV_MAX_CONCURRENT)? {
            config.limits.max_concurrent = max;
        }

        Ok(())
    }

    fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>, KilnError> {
        match env::var(key) {
            Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                KilnError::ConfigError(format!("{} must be a non-negative integer, got '{}'", key, raw))
            }),
            Err(_) => Ok(None),
        }
    }
}
