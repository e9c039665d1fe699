//! Error types for the kiln HTTP server.

use axum::http::StatusCode;
use axum::response::Json;
use serde_json::json;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Body and status returned by handlers on failure.
pub type ErrorResponse = (StatusCode, Json<serde_json::Value>);

#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed request body
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Well-formed request with an unacceptable value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_)
            | ServerError::InvalidInput(_)
            | ServerError::Json(_) => 400,
            ServerError::Config(_) | ServerError::Internal(_) => 500,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::InvalidInput(_) => "invalid_input",
            ServerError::Json(_) => "json_error",
            ServerError::Config(_) => "config_error",
            ServerError::Internal(_) => "internal_error",
        }
    }

    /// JSON error body in the shape every handler returns.
    pub fn into_response_parts(self, summary: &str) -> ErrorResponse {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(json!({
                "error": summary,
                "type": self.error_type(),
                "details": self.to_string(),
                "timestamp": chrono::Utc::now()
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_400() {
        assert_eq!(ServerError::invalid_input("bad kind").status_code(), 400);
        assert_eq!(ServerError::invalid_request("no body").status_code(), 400);
        assert_eq!(ServerError::internal("boom").status_code(), 500);
    }

    #[test]
    fn test_response_parts_carry_details() {
        let (status, Json(body)) =
            ServerError::invalid_input("Unknown event kind 'loud'").into_response_parts("Invalid log entry");

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid log entry");
        assert_eq!(body["type"], "invalid_input");
        assert_eq!(body["details"], "Invalid input: Unknown event kind 'loud'");
        assert!(body.get("timestamp").is_some());
    }
}
