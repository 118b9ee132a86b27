use thiserror::Error;

/// Errors raised by the broadcast hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type HubResult<T> = Result<T, HubError>;
