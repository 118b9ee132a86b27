//! Tumbling-window table.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use vigil_types::{window_bounds, AggregatePublish, AggregateRecord, TelemetrySample};

use crate::error::{AggregatorError, AggregatorResult};

/// Identifies one open window.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowKey {
    pub device_id: String,
    pub window_start: i64,
}

/// Running per-metric averages for one device over one window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub device_id: String,
    /// Wall-clock time the window was opened (epoch ms).
    pub created_at: i64,
    pub window_start: i64,
    pub window_end: i64,
    pub metrics: HashMap<String, f64>,
    pub sample_count: u64,
}

impl WindowAggregate {
    fn open(device_id: &str, window_start: i64, window_end: i64, created_at: i64) -> Self {
        Self {
            device_id: device_id.to_string(),
            created_at,
            window_start,
            window_end,
            metrics: HashMap::new(),
            sample_count: 0,
        }
    }

    /// Fold one sample in.
    ///
    /// `n` is the window's total sample count, shared by every metric. A
    /// metric seen for the first time takes its value as-is.
    fn absorb(&mut self, metrics: &HashMap<String, f64>) {
        self.sample_count += 1;
        let n = self.sample_count as f64;
        for (name, &value) in metrics {
            match self.metrics.get_mut(name) {
                Some(avg) => *avg = (*avg * (n - 1.0) + value) / n,
                None => {
                    self.metrics.insert(name.clone(), value);
                }
            }
        }
    }

    pub fn key(&self) -> WindowKey {
        WindowKey {
            device_id: self.device_id.clone(),
            window_start: self.window_start,
        }
    }

    /// Whether the window may be flushed at `now_ms`.
    pub fn is_closed(&self, now_ms: i64, grace_ms: i64) -> bool {
        self.window_end.saturating_add(grace_ms) <= now_ms
    }

    /// One persisted row per metric, in metric-name order.
    pub fn to_records(&self) -> Vec<AggregateRecord> {
        let mut names: Vec<&String> = self.metrics.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| AggregateRecord {
                device_id: self.device_id.clone(),
                timestamp: self.created_at,
                window_start: self.window_start,
                window_end: self.window_end,
                metric_name: name.clone(),
                metric_value: self.metrics[name],
                sample_count: self.sample_count,
            })
            .collect()
    }

    pub fn to_publish(&self) -> AggregatePublish {
        AggregatePublish {
            device_id: self.device_id.clone(),
            timestamp: self.created_at,
            window_start: self.window_start,
            window_end: self.window_end,
            metrics: self.metrics.clone(),
            count: self.sample_count,
        }
    }
}

/// Open windows keyed by device, then by window start.
///
/// Pure data structure: no locking, no clock. The caller supplies `now_ms`.
#[derive(Debug, Clone)]
pub struct WindowTable {
    window_ms: i64,
    grace_ms: i64,
    devices: HashMap<String, BTreeMap<i64, WindowAggregate>>,
}

impl WindowTable {
    pub fn new(window_ms: i64, grace_ms: i64) -> Self {
        debug_assert!(window_ms > 0);
        Self {
            window_ms,
            grace_ms: grace_ms.max(0),
            devices: HashMap::new(),
        }
    }

    /// Add a sample to the window its timestamp maps to.
    ///
    /// `now_ms` is only used as the creation time of a new window. A sample
    /// whose window bounds overflow is rejected and leaves the table as is.
    pub fn ingest(
        &mut self,
        sample: &TelemetrySample,
        now_ms: i64,
    ) -> AggregatorResult<WindowKey> {
        let (start, end) = window_bounds(sample.timestamp, self.window_ms).ok_or_else(|| {
            AggregatorError::TimestampOutOfRange {
                device_id: sample.device_id.clone(),
                timestamp: sample.timestamp,
            }
        })?;
        let aggregate = self
            .devices
            .entry(sample.device_id.clone())
            .or_default()
            .entry(start)
            .or_insert_with(|| WindowAggregate::open(&sample.device_id, start, end, now_ms));
        aggregate.absorb(&sample.metrics);

        Ok(WindowKey {
            device_id: sample.device_id.clone(),
            window_start: start,
        })
    }

    /// Remove and return every window closed at `now_ms`.
    ///
    /// Devices left without open windows are dropped. The result is ordered
    /// by window start, then device id.
    pub fn drain_closed(&mut self, now_ms: i64) -> Vec<WindowAggregate> {
        let grace_ms = self.grace_ms;
        let mut closed = Vec::new();

        self.devices.retain(|_, windows| {
            // Windows are ordered by start, so closed ones form a prefix.
            let open_from = windows
                .values()
                .find(|w| !w.is_closed(now_ms, grace_ms))
                .map(|w| w.window_start);
            let still_open = match open_from {
                Some(start) => windows.split_off(&start),
                None => BTreeMap::new(),
            };
            closed.extend(std::mem::replace(windows, still_open).into_values());
            !windows.is_empty()
        });

        closed.sort_by(|a, b| {
            a.window_start
                .cmp(&b.window_start)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        closed
    }

    /// Remove and return every open window regardless of time.
    pub fn drain_all(&mut self) -> Vec<WindowAggregate> {
        self.drain_closed(i64::MAX)
    }

    pub fn get(&self, device_id: &str, window_start: i64) -> Option<&WindowAggregate> {
        self.devices.get(device_id)?.get(&window_start)
    }

    /// Number of open windows across all devices.
    pub fn open_windows(&self) -> usize {
        self.devices.values().map(BTreeMap::len).sum()
    }

    /// Number of devices with at least one open window.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn grace_ms(&self) -> i64 {
        self.grace_ms
    }
}


#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    const MINUTE: i64 = 60_000;

    proptest! {
        /// With one metric per sample the running average is the plain mean.
        #[test]
        fn single_metric_average_is_arithmetic_mean(
            values in prop::collection::vec(-1.0e6f64..1.0e6, 1..60),
        ) {
            let mut t = WindowTable::new(MINUTE, 0);
            for (i, v) in values.iter().enumerate() {
                t.ingest(&TelemetrySample::new("dev", i as i64).with_metric("m", *v), 0).unwrap();
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let w = t.get("dev", 0).unwrap();
            prop_assert_eq!(w.sample_count, values.len() as u64);
            prop_assert!((w.metrics["m"] - mean).abs() <= 1e-6 * mean.abs().max(1.0));
        }

        /// Draining never loses or duplicates windows.
        #[test]
        fn drain_closed_partitions_windows(
            stamps in prop::collection::vec(0i64..20 * MINUTE, 1..80),
            now in 0i64..25 * MINUTE,
        ) {
            let mut t = WindowTable::new(MINUTE, MINUTE);
            for ts in &stamps {
                t.ingest(&TelemetrySample::new("dev", *ts), 0).unwrap();
            }
            let before = t.open_windows();
            let closed = t.drain_closed(now);
            prop_assert!(closed.iter().all(|w| w.window_end + MINUTE <= now));
            prop_assert_eq!(closed.len() + t.open_windows(), before);
            let total: u64 = closed.iter().map(|w| w.sample_count).sum::<u64>()
                + t.drain_all().iter().map(|w| w.sample_count).sum::<u64>();
            prop_assert_eq!(total, stamps.len() as u64);
        }
    }
}
