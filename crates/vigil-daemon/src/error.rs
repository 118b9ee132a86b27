//! Error types for vigil-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use vigil_aggregator::AggregatorError;
use vigil_anomaly::AnomalyError;
use vigil_sink::SinkError;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Sink or publisher error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Telemetry stream error
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

impl From<AggregatorError> for DaemonError {
    fn from(err: AggregatorError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

impl From<AnomalyError> for DaemonError {
    fn from(err: AnomalyError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Telemetry stream errors
#[derive(Debug, Error)]
pub enum StreamError {
    /// Could not connect or subscribe
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single read failed; the next read may succeed
    #[error("Read error: {0}")]
    Read(String),

    /// The source is gone for good
    #[error("Stream closed")]
    Closed,
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<prometheus::Error> for ApiError {
    fn from(err: prometheus::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = DaemonError::Stream(StreamError::Read("broker went away".into()));
        assert!(e.to_string().contains("broker went away"));

        let e: DaemonError = SinkError::Connection("refused".into()).into();
        assert!(matches!(e, DaemonError::Sink(_)));
    }

    #[test]
    fn api_error_status() {
        let response = ApiError::Internal("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
