use thiserror::Error;

/// Errors raised while turning a wire record into a [`crate::TelemetrySample`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed protobuf telemetry: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("malformed json telemetry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("telemetry record has an empty device_id")]
    MissingDeviceId,
}

/// Convenience type alias for decode results.
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert!(DecodeError::MissingDeviceId.to_string().contains("device_id"));
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DecodeError = json_err.into();
        assert!(matches!(err, DecodeError::Json(_)));
    }
}
