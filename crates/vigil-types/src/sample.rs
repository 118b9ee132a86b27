//! Decoded telemetry samples and window arithmetic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single decoded reading from one device.
///
/// Immutable once decoded; both stream consumers receive their own copy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Reporting device.
    pub device_id: String,
    /// Device-side timestamp in epoch milliseconds.
    pub timestamp: i64,
    /// Metric name to reading.
    pub metrics: HashMap<String, f64>,
    /// Opaque payload carried through from ingestion, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
}

impl TelemetrySample {
    /// Create a sample with no raw payload.
    pub fn new(device_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            metrics: HashMap::new(),
            raw: None,
        }
    }

    /// Builder-style metric insertion.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Tumbling window `[start, end)` containing `ts`.
///
/// `start = floor(ts / window_ms) * window_ms`. Uses euclidean division so
/// timestamps before the epoch still floor towards negative infinity.
///
/// `None` when either bound does not fit in an `i64`.
pub fn window_bounds(ts: i64, window_ms: i64) -> Option<(i64, i64)> {
    debug_assert!(window_ms > 0, "window size must be positive");
    let start = ts.div_euclid(window_ms).checked_mul(window_ms)?;
    let end = start.checked_add(window_ms)?;
    Some((start, end))
}


#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn window_contains_timestamp(
            ts in -1_000_000_000_000i64..4_000_000_000_000,
            window_ms in 1i64..86_400_000,
        ) {
            let (start, end) = window_bounds(ts, window_ms).unwrap();
            prop_assert!(start <= ts && ts < end);
            prop_assert_eq!(end - start, window_ms);
            prop_assert_eq!(start.rem_euclid(window_ms), 0);
        }
    }
}
