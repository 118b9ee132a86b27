//! Output records handed to the sink and the downstream topics.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Severity ────────────────────────────────────────────────────────────

/// Z-score at or above which an anomaly is `High`.
pub const HIGH_SEVERITY_Z: f64 = 5.0;

/// Z-score at or above which an anomaly is `Medium`.
pub const MEDIUM_SEVERITY_Z: f64 = 4.0;

/// Severity of a raised anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Grade an absolute z-score.
    pub fn from_z(abs_z: f64) -> Self {
        if abs_z >= HIGH_SEVERITY_Z {
            Self::High
        } else if abs_z >= MEDIUM_SEVERITY_Z {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Aggregates ──────────────────────────────────────────────────────────

/// One persisted row per metric of a flushed window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub device_id: String,
    /// When the window was first opened (epoch ms).
    pub timestamp: i64,
    pub window_start: i64,
    pub window_end: i64,
    pub metric_name: String,
    pub metric_value: f64,
    pub sample_count: u64,
}

/// One downstream message per flushed window, carrying every metric.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatePublish {
    pub device_id: String,
    pub timestamp: i64,
    pub window_start: i64,
    pub window_end: i64,
    pub metrics: HashMap<String, f64>,
    pub count: u64,
}

// ── Alerts ──────────────────────────────────────────────────────────────

/// Alert type written for every detector-raised alert.
pub const ALERT_TYPE_ANOMALY: &str = "anomaly";

/// Status of a freshly raised alert.
pub const ALERT_STATUS_OPEN: &str = "open";

/// Persisted alert row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub device_id: String,
    pub timestamp: i64,
    pub metric_name: String,
    pub value: f64,
    pub alert_type: String,
    pub severity: Severity,
    pub z_score: f64,
    pub threshold: f64,
    pub status: String,
    pub message: String,
}

impl AlertRecord {
    /// Build an open anomaly alert with the standard message.
    pub fn anomaly(
        device_id: impl Into<String>,
        timestamp: i64,
        metric_name: impl Into<String>,
        value: f64,
        severity: Severity,
        z_score: f64,
        threshold: f64,
    ) -> Self {
        let metric_name = metric_name.into();
        let message = format!(
            "Anomalous {} value detected: {:.2} (Z-score: {:.2})",
            metric_name, value, z_score
        );
        Self {
            device_id: device_id.into(),
            timestamp,
            metric_name,
            value,
            alert_type: ALERT_TYPE_ANOMALY.to_string(),
            severity,
            z_score,
            threshold,
            status: ALERT_STATUS_OPEN.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_grading_boundaries() {
        assert_eq!(Severity::from_z(3.01), Severity::Low);
        assert_eq!(Severity::from_z(3.99), Severity::Low);
        assert_eq!(Severity::from_z(4.0), Severity::Medium);
        assert_eq!(Severity::from_z(4.99), Severity::Medium);
        assert_eq!(Severity::from_z(5.0), Severity::High);
        assert_eq!(Severity::from_z(50.0), Severity::High);
    }

    #[test]
    fn severity_ordering_and_serde() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(serde_json::to_string(&Severity::Medium).unwrap(), "\"medium\"");
        assert_eq!(Severity::High.to_string(), "high");
    }

    #[test]
    fn anomaly_alert_record_fields() {
        let rec = AlertRecord::anomaly("dev-1", 99, "pressure", 1000.0, Severity::High, 12.345, 3.0);
        assert_eq!(rec.alert_type, "anomaly");
        assert_eq!(rec.status, "open");
        assert_eq!(
            rec.message,
            "Anomalous pressure value detected: 1000.00 (Z-score: 12.35)"
        );
    }

    #[test]
    fn aggregate_publish_json_shape() {
        let publish = AggregatePublish {
            device_id: "dev-1".into(),
            timestamp: 1,
            window_start: 0,
            window_end: 60_000,
            metrics: HashMap::from([("temperature".to_string(), 27.5)]),
            count: 2,
        };
        let v = serde_json::to_value(&publish).unwrap();
        assert_eq!(v["count"], 2);
        assert_eq!(v["metrics"]["temperature"], 27.5);
        assert_eq!(v["window_end"], 60_000);
    }
}
