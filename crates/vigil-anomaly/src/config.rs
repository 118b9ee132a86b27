//! Detector configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, AnomalyResult};
use crate::{
    DEFAULT_ALERT_THRESHOLD, DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_INACTIVITY_SECS, MIN_SAMPLES,
};

/// Configuration for the anomaly detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// |z| above which a reading raises an alert.
    pub alert_threshold: f64,
    /// Observations required before scoring starts.
    pub min_samples: u64,
    /// Silence after which a device's statistics are dropped.
    pub inactivity_secs: u64,
    /// Interval between inactivity sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            min_samples: MIN_SAMPLES,
            inactivity_secs: DEFAULT_INACTIVITY_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> AnomalyResult<()> {
        if !(self.alert_threshold.is_finite() && self.alert_threshold > 0.0) {
            return Err(AnomalyError::InvalidConfig(format!(
                "alert_threshold must be a positive number, got {}",
                self.alert_threshold
            )));
        }
        if self.min_samples < 2 {
            return Err(AnomalyError::InvalidConfig(format!(
                "min_samples must be at least 2, got {}",
                self.min_samples
            )));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(AnomalyError::InvalidConfig(
                "cleanup_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub(crate) fn inactivity_ms(&self) -> i64 {
        i64::try_from(self.inactivity_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000)
    }
}
