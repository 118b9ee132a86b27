//! Simulated device fleet feeding a [`MemoryLog`]

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vigil_types::{encode_json, encode_protobuf, now_millis, TelemetrySample, WireFormat};

use super::MemoryLog;
use crate::config::SimulationConfig;

/// Metrics every simulated device reports.
pub const SIMULATED_METRICS: &[&str] = &[
    "temperature",
    "humidity",
    "pressure",
    "cpu_usage",
    "memory_usage",
    "battery_level",
];

/// Generates plausible readings for a fleet of devices.
pub struct Simulator {
    device_ids: Vec<String>,
    interval: Duration,
    anomaly_rate: f64,
    wire_format: WireFormat,
    rng: StdRng,
}

impl Simulator {
    pub fn new(config: &SimulationConfig, wire_format: WireFormat) -> Self {
        Self::with_rng(config, wire_format, StdRng::from_entropy())
    }

    /// Deterministic fleet for tests.
    pub fn seeded(config: &SimulationConfig, wire_format: WireFormat, seed: u64) -> Self {
        Self::with_rng(config, wire_format, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &SimulationConfig, wire_format: WireFormat, rng: StdRng) -> Self {
        Self {
            device_ids: (1..=config.devices)
                .map(|i| format!("sim-device-{:04}", i))
                .collect(),
            interval: Duration::from_millis(config.interval_ms.max(1)),
            anomaly_rate: config.anomaly_rate.clamp(0.0, 1.0),
            wire_format,
            rng,
        }
    }

    pub fn device_ids(&self) -> &[String] {
        &self.device_ids
    }

    /// One reading for `device_id` at `ts`.
    pub fn reading(&mut self, device_id: &str, ts: i64) -> TelemetrySample {
        let mut sample = TelemetrySample::new(device_id, ts);
        for &metric in SIMULATED_METRICS {
            let value = if self.rng.gen_bool(self.anomaly_rate) {
                self.anomalous(metric)
            } else {
                self.normal(metric)
            };
            sample = sample.with_metric(metric, value);
        }
        if self.rng.gen_bool(0.3) {
            sample = sample.with_metric("power_consumption", self.rng.gen::<f64>() * 100.0);
        }
        sample
    }

    fn normal(&mut self, metric: &str) -> f64 {
        let r = &mut self.rng;
        match metric {
            "temperature" => 18.0 + r.gen::<f64>() * 10.0 + (r.gen::<f64>() - 0.5) * 2.0,
            "humidity" => 30.0 + r.gen::<f64>() * 50.0 + (r.gen::<f64>() - 0.5) * 5.0,
            "pressure" => 1013.0 + (r.gen::<f64>() - 0.5) * 100.0,
            "cpu_usage" => r.gen::<f64>() * 100.0,
            "memory_usage" => 20.0 + r.gen::<f64>() * 70.0,
            "battery_level" => r.gen::<f64>() * 100.0,
            _ => r.gen::<f64>(),
        }
    }

    fn anomalous(&mut self, metric: &str) -> f64 {
        let r = &mut self.rng;
        let low = r.gen_bool(0.5);
        let u = r.gen::<f64>();
        match metric {
            "temperature" if low => -10.0 + u * 5.0,
            "temperature" => 45.0 + u * 20.0,
            "humidity" if low => u * 10.0,
            "humidity" => 95.0 + u * 5.0,
            "pressure" => 850.0 + u * 50.0,
            "cpu_usage" => 95.0 + u * 5.0,
            "memory_usage" => 90.0 + u * 10.0,
            "battery_level" => u * 5.0,
            _ => u,
        }
    }

    /// Append one reading per device to `log`. Returns how many were appended.
    pub fn tick(&mut self, log: &MemoryLog, ts: i64) -> usize {
        let mut appended = 0;
        for i in 0..self.device_ids.len() {
            let device_id = self.device_ids[i].clone();
            let sample = self.reading(&device_id, ts);
            let payload = match self.wire_format {
                WireFormat::Protobuf => encode_protobuf(&sample),
                WireFormat::Json => match encode_json(&sample) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "Failed to encode simulated reading");
                        continue;
                    }
                },
            };
            let (partition, offset) = log.append(Some(device_id.as_bytes()), payload);
            debug!(device_id = %device_id, partition, offset, "Simulated reading");
            appended += 1;
        }
        appended
    }

    /// Emit readings on every interval until shutdown.
    pub async fn run(mut self, log: MemoryLog, mut shutdown: watch::Receiver<bool>) {
        info!(
            devices = self.device_ids.len(),
            interval_ms = self.interval.as_millis() as u64,
            anomaly_rate = self.anomaly_rate,
            "Simulator started"
        );
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.tick(&log, now_millis());
                }
            }
        }

        info!("Simulator stopped");
    }
}
