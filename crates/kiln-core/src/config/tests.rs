use super::loader::{ENV_COMPILER, ENV_MAX_CONCURRENT, ENV_RUN_TIMEOUT};
use super::*;
use crate::errors::KilnError;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;

fn clear_overrides() {
    env::remove_var(ENV_COMPILER);
    env::remove_var(ENV_RUN_TIMEOUT);
    env::remove_var(ENV_MAX_CONCURRENT);
    env::remove_var(loader::ENV_COMPILE_TIMEOUT);
}

#[test]
#[serial]
fn test_empty_document_yields_defaults() {
    clear_overrides();
    let config = ConfigLoader::from_str("").unwrap();

    assert_eq!(config.toolchain.compiler, "gcc");
    assert_eq!(config.toolchain.source_file, "gui_app.c");
    assert_eq!(config.limits.compile_timeout_secs, 30);
    assert_eq!(config.limits.run_timeout_secs, 10);
    assert_eq!(config.limits.max_concurrent, 4);
    assert_eq!(config.relay.buffer_capacity, 1000);
    assert_eq!(config.relay.max_buffered_sessions, 64);
    assert_eq!(config.workspace.prefix, "kiln-");
    assert_eq!(config.logging.level, "info");
}

#[cfg(not(windows))]
#[test]
fn test_default_flags_pin_install_locations() {
    let flags = ToolchainConfig::default().compile_flags();
    assert_eq!(
        flags,
        vec![
            "-I/usr/local/include/Gooey",
            "-I/usr/local/include/GLPS",
            "-L/usr/local/lib",
            "-lGooeyGUI-1",
            "-lGLPS",
        ]
    );
}

#[test]
#[serial]
fn test_partial_yaml_keeps_other_defaults() {
    clear_overrides();
    let yaml = r#"
toolchain:
  compiler: /opt/cc/bin/cc
  libraries: [m]
limits:
  run_timeout_secs: 3
runner:
  environment:
    DISPLAY: ":0"
"#;
    let config = ConfigLoader::from_str(yaml).unwrap();

    assert_eq!(config.toolchain.compiler, "/opt/cc/bin/cc");
    assert_eq!(config.toolchain.libraries, vec!["m".to_string()]);
    assert_eq!(config.toolchain.source_file, "gui_app.c");
    assert_eq!(config.limits.run_timeout_secs, 3);
    assert_eq!(config.limits.compile_timeout_secs, 30);
    assert_eq!(config.runner.environment.get("DISPLAY").unwrap(), ":0");
}

#[test]
#[serial]
fn test_zero_run_timeout_is_rejected() {
    clear_overrides();
    let result = ConfigLoader::from_str("limits:\n  run_timeout_secs: 0\n");
    match result {
        Err(KilnError::ConfigError(msg)) => assert!(msg.contains("Run timeout")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_source_file_must_be_plain_name() {
    let mut config = KilnConfig::default();
    config.toolchain.source_file = "../escape.c".to_string();
    assert!(config.validate().is_err());

    config.toolchain.source_file = "main.c".to_string();
    assert!(config.validate().is_ok());
}

#[test]
fn test_zero_buffered_sessions_is_rejected() {
    let mut config = KilnConfig::default();
    config.relay.max_buffered_sessions = 0;
    match config.validate() {
        Err(KilnError::ConfigError(msg)) => assert!(msg.contains("max_buffered_sessions")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_artifact_and_source_must_differ() {
    let mut config = KilnConfig::default();
    config.toolchain.artifact_name = config.toolchain.source_file.clone();
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_malformed_yaml_is_a_config_error() {
    clear_overrides();
    let result = ConfigLoader::from_str("limits: [not, a, map]");
    assert!(matches!(result, Err(KilnError::ConfigError(_))));
}

#[test]
#[serial]
fn test_env_overrides_take_precedence() {
    clear_overrides();
    env::set_var(ENV_COMPILER, "clang");
    env::set_var(ENV_RUN_TIMEOUT, "7");
    env::set_var(ENV_MAX_CONCURRENT, "2");

    let config = ConfigLoader::from_str("limits:\n  run_timeout_secs: 3\n");
    clear_overrides();

    let config = config.unwrap();
    assert_eq!(config.toolchain.compiler, "clang");
    assert_eq!(config.limits.run_timeout_secs, 7);
    assert_eq!(config.limits.max_concurrent, 2);
}

#[test]
#[serial]
fn test_invalid_env_override_is_reported() {
    clear_overrides();
    env::set_var(ENV_RUN_TIMEOUT, "soon");
    let result = ConfigLoader::from_str("");
    clear_overrides();

    assert!(matches!(result, Err(KilnError::ConfigError(_))));
}

#[tokio::test]
#[serial]
async fn test_from_file_and_missing_file_fallback() {
    clear_overrides();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kiln.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "workspace:\n  prefix: run-").unwrap();
    drop(file);

    let config = ConfigLoader::from_file(&path).await.unwrap();
    assert_eq!(config.workspace.prefix, "run-");

    let missing: PathBuf = dir.path().join("absent.yaml");
    assert!(ConfigLoader::from_file(&missing).await.is_err());
    let fallback = ConfigLoader::from_file_or_default(&missing).await.unwrap();
    assert_eq!(fallback.workspace.prefix, "kiln-");
}
