//! HTTP and SSE front end for the kiln pipeline
//!
//! Exposes the in-process [`ExecutionCoordinator`] operations over HTTP:
//! submitting a program, subscribing to the output stream, liveness, external
//! log injection and cancellation. Subscribing to `/events` attaches the
//! relay's single consumer, which flushes everything buffered while no client
//! was listening. The flush runs alongside the response body so a backlog
//! larger than the subscriber channel drains instead of stalling.

pub mod error;
pub mod sse;

pub use error::{ErrorResponse, Result, ServerError};
pub use sse::{SseEvent, SseStream};

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Json as AxumJson, Path, State};
use axum::http::StatusCode;
use axum::response::{Json, Response};
use axum::routing::{get, post};
use axum::{middleware, Router};
use kiln_core::kiln_types::{CorrelationId, EventKind, ExecutionRequest, ExecutionResult, Ping};
use kiln_core::ExecutionCoordinator;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const DEFAULT_PORT: u16 = 5050;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Body of `POST /log`.
#[derive(Debug, Clone, Deserialize)]
pub struct LogRequest {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(rename = "processId", default)]
    pub process_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub enable_cors: bool,
    /// CORS allowed origins (if None, allows any origin)
    pub cors_origins: Option<Vec<String>>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    pub enable_logging: bool,
    pub sse_keepalive_interval: Duration,
    /// Events queued per SSE subscriber before the relay applies backpressure
    pub event_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            enable_cors: true,
            cors_origins: None,
            max_body_size: 1024 * 1024,
            enable_logging: true,
            sse_keepalive_interval: Duration::from_secs(15),
            event_channel_capacity: 256,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address '{}': {}", addr, e)))?;
        Ok(self)
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }

    pub fn with_sse_keepalive(mut self, interval: Duration) -> Self {
        self.sse_keepalive_interval = interval;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ExecutionCoordinator>,
    pub config: ServerConfig,
}

/// Handler for the /execute POST endpoint.
async fn execute_handler(
    State(app_state): State<AppState>,
    body: std::result::Result<AxumJson<ExecutionRequest>, JsonRejection>,
) -> std::result::Result<Json<ExecutionResult>, ErrorResponse> {
    let AxumJson(request) = body.map_err(|e| {
        log::warn!("Rejected execute request: {}", e);
        ServerError::invalid_request(e.body_text()).into_response_parts("Invalid execute request")
    })?;

    log::info!("Received execute request ({} bytes of source)", request.source.len());
    let result = app_state.coordinator.execute(request).await;
    Ok(Json(result))
}

/// Handler for the /events GET endpoint.
async fn events_handler(State(app_state): State<AppState>) -> Response {
    let (tx, mut rx) = mpsc::channel(app_state.config.event_channel_capacity);

    // The flush can only finish once the body below is being read.
    let coordinator = Arc::clone(&app_state.coordinator);
    tokio::spawn(async move {
        if coordinator.attach_consumer(tx).await {
            log::info!("Output subscriber attached");
        } else {
            log::warn!("Output subscriber went away while buffered events were flushed");
        }
    });

    let events = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
    };

    crate::sse::create_sse_response_with_keepalive(
        events,
        app_state.config.sse_keepalive_interval,
        "keep-alive",
    )
}

async fn ping_handler(State(app_state): State<AppState>) -> Json<Ping> {
    Json(app_state.coordinator.ping())
}

/// Handler for the /log POST endpoint.
async fn log_handler(
    State(app_state): State<AppState>,
    body: std::result::Result<AxumJson<LogRequest>, JsonRejection>,
) -> std::result::Result<Json<serde_json::Value>, ErrorResponse> {
    let AxumJson(entry) = body.map_err(|e| {
        ServerError::invalid_request(e.body_text()).into_response_parts("Invalid log entry")
    })?;

    let kind = match entry.kind.as_deref() {
        None => EventKind::default(),
        Some(kind) => kind.parse::<EventKind>().map_err(|e| {
            log::warn!("Rejected log entry: {}", e);
            ServerError::invalid_input(e.to_string()).into_response_parts("Invalid log entry")
        })?,
    };

    let id = app_state
        .coordinator
        .log_external(entry.message, kind, entry.process_id.map(CorrelationId::from))
        .await;

    Ok(Json(json!({
        "status": "ok",
        "processId": id
    })))
}

/// Handler for the /cancel/{id} POST endpoint.
async fn cancel_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let id = CorrelationId::from(id);
    let cancelled = app_state.coordinator.cancel(&id);
    if !cancelled {
        log::debug!("Cancel requested for unknown session {}", id);
    }
    Json(json!({
        "cancelled": cancelled,
        "processId": id
    }))
}

pub struct KilnServer {
    coordinator: Arc<ExecutionCoordinator>,
    config: ServerConfig,
}

impl KilnServer {
    pub fn new(coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self {
            coordinator,
            config: ServerConfig::default(),
        }
    }

    pub fn with_config(coordinator: Arc<ExecutionCoordinator>, config: ServerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            coordinator: Arc::clone(&self.coordinator),
            config: self.config.clone(),
        };

        let mut router = Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(HealthResponse {
                        status: "healthy".to_string(),
                        timestamp: chrono::Utc::now(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    })
                }),
            )
            .route("/ping", get(ping_handler))
            .route("/execute", post(execute_handler))
            .route("/events", get(events_handler))
            .route("/log", post(log_handler))
            .route("/cancel/{id}", post(cancel_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    // Liveness probes are frequent
                    if uri.path() == "/ping" {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    let duration = start.elapsed();

                    if uri.path() == "/ping" {
                        log::debug!("Response {} completed in {:?}", request_id, duration);
                    } else {
                        log::info!(
                            "Response {} {} in {:?}",
                            request_id,
                            response.status(),
                            duration
                        );
                    }

                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors_layer = if let Some(ref origins) = self.config.cors_origins {
                let origins: std::result::Result<Vec<_>, _> =
                    origins.iter().map(|s| s.parse()).collect();
                match origins {
                    Ok(origins) => CorsLayer::new()
                        .allow_origin(origins)
                        .allow_methods(Any)
                        .allow_headers(Any),
                    Err(_) => {
                        log::warn!("Invalid CORS origin configured; allowing any origin");
                        CorsLayer::permissive()
                    }
                }
            } else {
                CorsLayer::permissive()
            };
            router = router.layer(cors_layer);
        }

        router
    }

    /// Serve until `shutdown_signal` resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!("kiln server listening on {}", self.config.bind_addr);
        log::info!("Execute endpoint: http://{}/execute", self.config.bind_addr);
        log::info!("Event stream: http://{}/events", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        let live = self.coordinator.live_sessions();
        if !live.is_empty() {
            log::warn!("Cancelling {} in-flight session(s)", live.len());
            for id in &live {
                self.coordinator.cancel(id);
            }
        }
        log::info!(
            "kiln server shut down gracefully ({} workspace(s) still active)",
            self.coordinator.workspaces().active()
        );
        Ok(())
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}
