//! kiln binary
//!
//! `kiln serve` exposes the pipeline over HTTP with an SSE output stream.
//! `kiln exec` pushes one source file through the pipeline and prints every
//! event to the terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_core::kiln_types::ExecutionRequest;
use kiln_core::{ConfigLoader, ExecutionCoordinator, KilnConfig};
use kiln_server::{shutdown_signal, KilnServer, ServerConfig};
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "Compile and run submitted C programs, streaming their output")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; defaults apply when it does not exist
    #[arg(long, short, global = true, default_value = "kiln.yaml")]
    config: PathBuf,

    /// Log level; overrides `logging.level` from the configuration
    #[arg(long, short, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long, default_value = "127.0.0.1:5050")]
        bind_addr: String,

        /// CORS allowed origins (comma-separated)
        #[arg(long)]
        cors_origins: Option<String>,

        /// Disable CORS headers entirely
        #[arg(long)]
        no_cors: bool,

        /// Maximum request body size in bytes
        #[arg(long, default_value_t = 1024 * 1024)]
        max_body_size: usize,

        /// Seconds between SSE keep-alive comments
        #[arg(long, default_value_t = 15)]
        sse_keepalive_secs: u64,

        /// Events queued for the SSE subscriber before delivery waits
        #[arg(long, default_value_t = 256)]
        event_channel_capacity: usize,
    },
    /// Compile and run one source file, printing its output
    Exec {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::from_file_or_default(&cli.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level);
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    match cli.command {
        Commands::Serve {
            bind_addr,
            cors_origins,
            no_cors,
            max_body_size,
            sse_keepalive_secs,
            event_channel_capacity,
        } => {
            let server_config = ServerConfig::default()
                .with_bind_addr_str(&bind_addr)?
                .with_cors(!no_cors)
                .with_max_body_size(max_body_size)
                .with_sse_keepalive(Duration::from_secs(sse_keepalive_secs.max(1)))
                .with_event_channel_capacity(event_channel_capacity)
                .with_logging(true);
            run_server(config, server_config, cors_origins).await
        }
        Commands::Exec { file } => {
            let success = run_once(config, file).await?;
            if !success {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn run_server(
    config: KilnConfig,
    mut server_config: ServerConfig,
    cors_origins: Option<String>,
) -> Result<()> {
    let coordinator = Arc::new(ExecutionCoordinator::new(config)?);

    if let Some(origins) = cors_origins {
        let origins: Vec<String> = origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        server_config = server_config.with_cors_origins(origins);
    }

    let server = KilnServer::with_config(coordinator, server_config);
    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

async fn run_once(config: KilnConfig, file: PathBuf) -> Result<bool> {
    let source = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let coordinator = ExecutionCoordinator::new(config)?;
    let (tx, mut rx) = mpsc::channel(256);
    coordinator.attach_consumer(tx).await;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", event.console_line());
        }
    });

    let result = coordinator.execute(ExecutionRequest::new(source)).await;

    // Dropping the coordinator drops the relay's sender and ends the printer.
    drop(coordinator);
    printer.await.context("Output printer failed")?;

    log::info!(
        "Session {} finished (success: {}, exit code: {:?})",
        result.correlation_id,
        result.success,
        result.exit_code
    );
    Ok(result.success)
}
