use thiserror::Error;

/// Errors from the aggregation subsystem.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("invalid aggregator configuration: {0}")]
    InvalidConfig(String),

    #[error("timestamp {timestamp} from {device_id} has no representable window")]
    TimestampOutOfRange { device_id: String, timestamp: i64 },
}

/// Convenience type alias for aggregator results.
pub type AggregatorResult<T> = Result<T, AggregatorError>;
