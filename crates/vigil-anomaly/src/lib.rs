//! # vigil-anomaly
//!
//! Online anomaly detection over the telemetry stream.
//!
//! ## Architecture
//!
//! ```text
//!   TelemetrySample ──► StatsTable ──► MetricStats (per device, per metric)
//!                          │              ├── count / sum / sum of squares
//!                          │              └── mean / stddev / min / max
//!                          ▼
//!                       Anomaly ──► AlertRecord (sink) + alerts topic + live `alert` event
//! ```
//!
//! Each reading is scored against the statistics accumulated *before* it,
//! and only then folded in. Scoring starts once a series has
//! [`MIN_SAMPLES`] observations. Devices silent for longer than the
//! inactivity threshold are swept away.

#![deny(unsafe_code)]

pub mod config;
pub mod detector;
pub mod error;
pub mod stats;
pub mod table;

pub use config::DetectorConfig;
pub use detector::{AnomalyDetector, DetectionReport, DetectorSnapshot};
pub use error::{AnomalyError, AnomalyResult};
pub use stats::{Anomaly, DeviceStats, MetricStats};
pub use table::{Observation, StatsTable};

pub use vigil_types::records::{HIGH_SEVERITY_Z, MEDIUM_SEVERITY_Z};

/// Observations a series needs before readings are scored.
pub const MIN_SAMPLES: u64 = 10;

/// Default |z| above which a reading is anomalous.
pub const DEFAULT_ALERT_THRESHOLD: f64 = 3.0;

/// Default inactivity after which a device's statistics are purged (24h).
pub const DEFAULT_INACTIVITY_SECS: u64 = 24 * 60 * 60;

/// Default interval between inactivity sweeps (10 minutes).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 10 * 60;
