//! Aggregator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AggregatorError, AggregatorResult};

/// Default tumbling window size in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Default delay after a window's end before it is flushed.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 120;

/// Aggregator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Window size in seconds
    pub window_secs: u64,

    /// Extra time a closed window stays open for late samples
    pub grace_period_secs: u64,

    /// How often closed windows are flushed
    pub flush_interval_secs: u64,

    /// Flush every open window when the daemon shuts down
    pub flush_on_shutdown: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            flush_interval_secs: DEFAULT_WINDOW_SECS,
            flush_on_shutdown: false,
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> AggregatorResult<()> {
        if self.window_secs == 0 {
            return Err(AggregatorError::InvalidConfig(
                "window_secs must be greater than zero".into(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(AggregatorError::InvalidConfig(
                "flush_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub(crate) fn window_ms(&self) -> i64 {
        secs_to_ms(self.window_secs)
    }

    pub(crate) fn grace_period_ms(&self) -> i64 {
        secs_to_ms(self.grace_period_secs)
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}
