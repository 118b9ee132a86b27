//! Online statistics and the anomalies they produce.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use vigil_types::{AlertRecord, Severity};

// ── Metric Statistics ───────────────────────────────────────────────────

/// Running statistics for one (device, metric) series.
///
/// Updated in O(1) per reading from the sum and sum of squares:
/// `mean = sum / count`, and for `count > 1`
/// `variance = (sum_sq - count * mean²) / (count - 1)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    /// Device-side timestamp of the last reading (epoch ms).
    pub last_updated: i64,
}

impl MetricStats {
    /// Statistics seeded from a first reading.
    pub fn first(value: f64, ts: i64) -> Self {
        Self {
            count: 1,
            sum: value,
            sum_sq: value * value,
            mean: value,
            stddev: 0.0,
            min: value,
            max: value,
            last_updated: ts,
        }
    }

    /// Fold a reading into the statistics.
    pub fn update(&mut self, value: f64, ts: i64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last_updated = ts;

        let n = self.count as f64;
        self.mean = self.sum / n;

        // Identical readings have zero variance; rounding in the sums must
        // not turn that into a tiny positive stddev.
        self.stddev = if self.count > 1 && self.min < self.max {
            let variance = (self.sum_sq - n * self.mean * self.mean) / (n - 1.0);
            if variance > 0.0 {
                variance.sqrt()
            } else {
                0.0
            }
        } else {
            0.0
        };
    }

    /// Standard score of `value` against the current statistics.
    ///
    /// Zero when the stddev is zero, so a perfectly stable series never
    /// scores as anomalous.
    pub fn z_score(&self, value: f64) -> f64 {
        if self.stddev == 0.0 {
            0.0
        } else {
            (value - self.mean) / self.stddev
        }
    }

    /// `[mean - k·stddev, mean + k·stddev]`.
    pub fn expected_range(&self, threshold: f64) -> [f64; 2] {
        [
            self.mean - threshold * self.stddev,
            self.mean + threshold * self.stddev,
        ]
    }
}

/// All series of one device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub device_id: String,
    pub metrics: HashMap<String, MetricStats>,
    /// Device-side timestamp of the last sample (epoch ms).
    pub last_updated: i64,
    pub sample_count: u64,
}

impl DeviceStats {
    pub fn new(device_id: impl Into<String>, ts: i64) -> Self {
        Self {
            device_id: device_id.into(),
            metrics: HashMap::new(),
            last_updated: ts,
            sample_count: 0,
        }
    }
}

// ── Anomaly ─────────────────────────────────────────────────────────────

/// A reading that deviated from its series baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub device_id: String,
    pub timestamp: i64,
    pub metric_name: String,
    pub value: f64,
    /// `[low, high]` band the reading was expected in.
    pub expected_range: [f64; 2],
    pub severity: Severity,
    pub z_score: f64,
}

impl Anomaly {
    /// Persisted form, tagged with the threshold that triggered it.
    pub fn to_alert_record(&self, threshold: f64) -> AlertRecord {
        AlertRecord::anomaly(
            self.device_id.clone(),
            self.timestamp,
            self.metric_name.clone(),
            self.value,
            self.severity,
            self.z_score,
            threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(values: &[f64]) -> Vec<MetricStats> {
        let mut out = Vec::new();
        let mut stats = MetricStats::first(values[0], 0);
        out.push(stats.clone());
        for (i, v) in values.iter().enumerate().skip(1) {
            stats.update(*v, i as i64);
            out.push(stats.clone());
        }
        out
    }

    #[test]
    fn pressure_sequence_mean_and_stddev() {
        let history = feed(&[10.0, 20.0, 30.0]);
        let means: Vec<f64> = history.iter().map(|s| s.mean).collect();
        assert_eq!(means, vec![10.0, 15.0, 20.0]);

        assert_eq!(history[0].stddev, 0.0);
        assert!((history[1].stddev - 7.0710678).abs() < 1e-6);
        assert!((history[2].stddev - 10.0).abs() < 1e-9);
    }

    #[test]
    fn identical_values_have_zero_stddev() {
        for v in [0.1, 21.7, 1013.25, -3.3] {
            let history = feed(&[v; 50]);
            assert!(history.iter().all(|s| s.stddev == 0.0), "value {v}");
            assert!((history.last().unwrap().mean - v).abs() < 1e-9);
        }
    }

    #[test]
    fn min_max_and_count_track_updates() {
        let last = feed(&[5.0, -2.0, 9.0, 1.0]).pop().unwrap();
        assert_eq!(last.count, 4);
        assert_eq!(last.min, -2.0);
        assert_eq!(last.max, 9.0);
        assert_eq!(last.sum, 13.0);
        assert_eq!(last.last_updated, 3);
    }

    #[test]
    fn z_score_is_zero_without_spread() {
        let stats = MetricStats::first(42.0, 0);
        assert_eq!(stats.z_score(1_000_000.0), 0.0);
    }

    #[test]
    fn z_score_and_expected_range() {
        let stats = feed(&[10.0, 20.0, 30.0]).pop().unwrap();
        assert!((stats.z_score(50.0) - 3.0).abs() < 1e-9);
        let [low, high] = stats.expected_range(3.0);
        assert!((low + 10.0).abs() < 1e-9);
        assert!((high - 50.0).abs() < 1e-9);
    }

    #[test]
    fn anomaly_to_alert_record() {
        let anomaly = Anomaly {
            device_id: "dev-1".into(),
            timestamp: 5,
            metric_name: "temperature".into(),
            value: 99.5,
            expected_range: [18.0, 26.0],
            severity: Severity::High,
            z_score: 7.25,
        };
        let rec = anomaly.to_alert_record(3.0);
        assert_eq!(rec.threshold, 3.0);
        assert_eq!(rec.value, 99.5);
        assert_eq!(rec.severity, Severity::High);
        assert_eq!(rec.message, "Anomalous temperature value detected: 99.50 (Z-score: 7.25)");
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn running_stats_match_batch_stats(
            values in prop::collection::vec(-100.0f64..100.0, 2..100),
        ) {
            let mut stats = MetricStats::first(values[0], 0);
            for (i, v) in values.iter().enumerate().skip(1) {
                stats.update(*v, i as i64);
            }

            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);

            prop_assert_eq!(stats.count, values.len() as u64);
            prop_assert!((stats.mean - mean).abs() < 1e-6);
            prop_assert!((stats.stddev.powi(2) - variance).abs() < 1e-6);
            prop_assert!(stats.stddev >= 0.0);
            prop_assert_eq!(stats.min, values.iter().cloned().fold(f64::INFINITY, f64::min));
            prop_assert_eq!(stats.max, values.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
            prop_assert!(stats.min - 1e-9 <= stats.mean && stats.mean <= stats.max + 1e-9);
        }

        #[test]
        fn expected_range_matches_threshold(
            values in prop::collection::vec(0.0f64..100.0, 3..50),
            threshold in 0.5f64..6.0,
        ) {
            let mut stats = MetricStats::first(values[0], 0);
            for v in &values[1..] {
                stats.update(*v, 0);
            }
            let [low, high] = stats.expected_range(threshold);
            if stats.stddev > 0.0 {
                prop_assert!((stats.z_score(high) - threshold).abs() < 1e-4);
                prop_assert!((stats.z_score(low) + threshold).abs() < 1e-4);
            } else {
                prop_assert_eq!(low, high);
            }
        }
    }
}
