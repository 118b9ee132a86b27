use thiserror::Error;

/// Errors from the anomaly detection subsystem.
#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience type alias for detector results.
pub type AnomalyResult<T> = Result<T, AnomalyError>;
