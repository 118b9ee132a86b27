use thiserror::Error;

/// Errors raised by sink and publisher backends.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for SinkError {
    fn from(err: sqlx::Error) -> Self {
        SinkError::Query(err.to_string())
    }
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;
