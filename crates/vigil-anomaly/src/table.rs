//! Per-device statistics table.

use std::collections::HashMap;

use vigil_types::{Severity, TelemetrySample};

use crate::stats::{Anomaly, DeviceStats, MetricStats};

/// Result of observing one sample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    pub anomalies: Vec<Anomaly>,
    /// The device had no statistics before this sample.
    pub new_device: bool,
}

/// Statistics for every tracked device.
///
/// Pure data structure: no locking, no clock.
#[derive(Clone, Debug, Default)]
pub struct StatsTable {
    devices: HashMap<String, DeviceStats>,
}

impl StatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score every reading of `sample`, then fold it into the statistics.
    ///
    /// A series seen for the first time is only seeded. An established series
    /// with at least `min_samples` observations is scored against the
    /// statistics from before this reading.
    pub fn observe(
        &mut self,
        sample: &TelemetrySample,
        threshold: f64,
        min_samples: u64,
    ) -> Observation {
        let ts = sample.timestamp;
        let new_device = !self.devices.contains_key(&sample.device_id);
        let device = self
            .devices
            .entry(sample.device_id.clone())
            .or_insert_with(|| DeviceStats::new(sample.device_id.clone(), ts));

        let mut names: Vec<&String> = sample.metrics.keys().collect();
        names.sort();

        let mut anomalies = Vec::new();
        for name in names {
            let value = sample.metrics[name];
            let Some(stats) = device.metrics.get_mut(name) else {
                device.metrics.insert(name.clone(), MetricStats::first(value, ts));
                continue;
            };

            if stats.count >= min_samples {
                let z = stats.z_score(value);
                if z.abs() > threshold {
                    anomalies.push(Anomaly {
                        device_id: sample.device_id.clone(),
                        timestamp: ts,
                        metric_name: name.clone(),
                        value,
                        expected_range: stats.expected_range(threshold),
                        severity: Severity::from_z(z.abs()),
                        z_score: z,
                    });
                }
            }

            stats.update(value, ts);
        }

        device.last_updated = ts;
        device.sample_count += 1;

        Observation {
            anomalies,
            new_device,
        }
    }

    /// Drop every device with `now_ms - last_updated > inactivity_ms`.
    ///
    /// Returns the purged devices, sorted by id.
    pub fn purge_inactive(&mut self, now_ms: i64, inactivity_ms: i64) -> Vec<DeviceStats> {
        let stale: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, d)| now_ms.saturating_sub(d.last_updated) > inactivity_ms)
            .map(|(id, _)| id.clone())
            .collect();

        let mut purged: Vec<DeviceStats> = stale
            .iter()
            .filter_map(|id| self.devices.remove(id))
            .collect();
        purged.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        purged
    }

    pub fn get(&self, device_id: &str, metric: &str) -> Option<&MetricStats> {
        self.devices.get(device_id)?.metrics.get(metric)
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceStats> {
        self.devices.get(device_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of (device, metric) series tracked.
    pub fn series_count(&self) -> usize {
        self.devices.values().map(|d| d.metrics.len()).sum()
    }
}
