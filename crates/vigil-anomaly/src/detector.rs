//! Anomaly detector service.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use vigil_hub::BroadcastHub;
use vigil_sink::{Publisher, Sink};
use vigil_types::{DeviceStatus, DeviceStatusKind, EventKind, TelemetrySample};

use crate::config::DetectorConfig;
use crate::error::AnomalyResult;
use crate::stats::{Anomaly, MetricStats};
use crate::table::{Observation, StatsTable};

/// What happened to one sample's anomalies.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionReport {
    pub anomalies: Vec<Anomaly>,
    pub sink_failures: usize,
    pub publish_failures: usize,
}

/// Read-only view for health and status reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DetectorSnapshot {
    pub devices: usize,
    pub series: usize,
}

/// Online z-score detector.
///
/// Observation and the inactivity sweep share one lock; alert delivery runs
/// after it is released.
pub struct AnomalyDetector {
    config: DetectorConfig,
    table: RwLock<StatsTable>,
    sink: Arc<dyn Sink>,
    publisher: Arc<dyn Publisher>,
    hub: Option<Arc<BroadcastHub>>,
}

impl AnomalyDetector {
    pub fn new(
        config: DetectorConfig,
        sink: Arc<dyn Sink>,
        publisher: Arc<dyn Publisher>,
    ) -> AnomalyResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            table: RwLock::new(StatsTable::new()),
            sink,
            publisher,
            hub: None,
        })
    }

    /// Push `alert` and `device_status` events to live subscribers.
    pub fn with_hub(mut self, hub: Arc<BroadcastHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Score and absorb a sample. Pure in-memory update.
    pub fn observe(&self, sample: &TelemetrySample) -> Observation {
        self.table
            .write()
            .observe(sample, self.config.alert_threshold, self.config.min_samples)
    }

    /// Score a sample and deliver whatever it raised.
    pub async fn process(&self, sample: &TelemetrySample) -> DetectionReport {
        let observation = self.observe(sample);

        if observation.new_device {
            debug!(device_id = %sample.device_id, "Tracking new device");
            self.broadcast_status(&sample.device_id, DeviceStatusKind::Active, sample.timestamp);
        }

        self.dispatch(observation.anomalies).await
    }

    /// Persist, publish and broadcast anomalies. Failures are logged only.
    pub async fn dispatch(&self, anomalies: Vec<Anomaly>) -> DetectionReport {
        let mut report = DetectionReport::default();

        for anomaly in &anomalies {
            warn!(
                device_id = %anomaly.device_id,
                metric = %anomaly.metric_name,
                value = anomaly.value,
                z_score = anomaly.z_score,
                severity = %anomaly.severity,
                "Anomaly detected"
            );

            match serde_json::to_vec(anomaly) {
                Ok(payload) => {
                    if let Err(e) = self.publisher.publish(&anomaly.device_id, payload).await {
                        report.publish_failures += 1;
                        warn!(
                            device_id = %anomaly.device_id,
                            topic = self.publisher.topic(),
                            error = %e,
                            "Failed to publish anomaly"
                        );
                    }
                }
                Err(e) => {
                    report.publish_failures += 1;
                    warn!(device_id = %anomaly.device_id, error = %e, "Failed to encode anomaly");
                }
            }

            let record = anomaly.to_alert_record(self.config.alert_threshold);
            match self.sink.insert_alert(record).await {
                Ok(id) => debug!(alert_id = id, device_id = %anomaly.device_id, "Alert stored"),
                Err(e) => {
                    report.sink_failures += 1;
                    warn!(device_id = %anomaly.device_id, error = %e, "Failed to persist alert");
                }
            }

            if let Some(hub) = &self.hub {
                if let Err(e) = hub.broadcast_event(EventKind::Alert, anomaly) {
                    warn!(device_id = %anomaly.device_id, error = %e, "Failed to broadcast alert");
                }
            }
        }

        report.anomalies = anomalies;
        report
    }

    /// Purge devices inactive at `now_ms`. Returns how many were removed.
    #[instrument(skip(self))]
    pub fn cleanup(&self, now_ms: i64) -> usize {
        let purged = self
            .table
            .write()
            .purge_inactive(now_ms, self.config.inactivity_ms());

        for device in &purged {
            info!(device_id = %device.device_id, last_updated = device.last_updated, "Purged stale statistics");
            self.broadcast_status(&device.device_id, DeviceStatusKind::Inactive, device.last_updated);
        }
        purged.len()
    }

    fn broadcast_status(&self, device_id: &str, status: DeviceStatusKind, last_seen: i64) {
        let Some(hub) = &self.hub else {
            return;
        };
        let payload = DeviceStatus {
            device_id: device_id.to_string(),
            status,
            last_seen,
        };
        if let Err(e) = hub.broadcast_event(EventKind::DeviceStatus, &payload) {
            warn!(device_id, error = %e, "Failed to broadcast device status");
        }
    }

    /// Copy of one series' statistics.
    pub fn stats(&self, device_id: &str, metric: &str) -> Option<MetricStats> {
        self.table.read().get(device_id, metric).cloned()
    }

    pub fn snapshot(&self) -> DetectorSnapshot {
        let table = self.table.read();
        DetectorSnapshot {
            devices: table.device_count(),
            series: table.series_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_sink::{InMemoryPublisher, InMemorySink};
    use vigil_types::Severity;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    struct Fixture {
        detector: AnomalyDetector,
        sink: Arc<InMemorySink>,
        publisher: Arc<InMemoryPublisher>,
        hub: Arc<BroadcastHub>,
    }

    fn fixture() -> Fixture {
        let sink = Arc::new(InMemorySink::new());
        let publisher = Arc::new(InMemoryPublisher::new("alerts"));
        let hub = Arc::new(BroadcastHub::new(64));
        let detector = AnomalyDetector::new(DetectorConfig::default(), sink.clone(), publisher.clone())
            .unwrap()
            .with_hub(hub.clone());
        Fixture {
            detector,
            sink,
            publisher,
            hub,
        }
    }

    fn reading(ts: i64, value: f64) -> TelemetrySample {
        TelemetrySample::new("pump-3", ts).with_metric("pressure", value)
    }

    async fn warm_up(detector: &AnomalyDetector) {
        for i in 0..10 {
            let v = if i % 2 == 0 { 99.0 } else { 101.0 };
            let report = detector.process(&reading(i, v)).await;
            assert!(report.anomalies.is_empty());
        }
    }

    fn next_event(sub: &mut vigil_hub::Subscription) -> serde_json::Value {
        let text = sub.receiver.try_recv().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn anomaly_is_persisted_published_and_broadcast() {
        let f = fixture();
        let mut sub = f.hub.register();
        warm_up(&f.detector).await;

        let active = next_event(&mut sub);
        assert_eq!(active["type"], "device_status");
        assert_eq!(active["data"]["status"], "active");

        let report = f.detector.process(&reading(20, 500.0)).await;
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].severity, Severity::High);

        let alerts = f.sink.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "anomaly");
        assert_eq!(alerts[0].status, "open");
        assert_eq!(alerts[0].threshold, 3.0);

        let messages = f.publisher.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, "pump-3");
        let body = messages[0].json().unwrap();
        assert_eq!(body["metric_name"], "pressure");
        assert_eq!(body["severity"], "high");
        assert!(body["expected_range"].is_array());

        let alert = next_event(&mut sub);
        assert_eq!(alert["type"], "alert");
        assert_eq!(alert["data"]["value"], 500.0);
    }

    #[tokio::test]
    async fn failed_delivery_is_counted_not_retried() {
        let f = fixture();
        warm_up(&f.detector).await;
        f.sink.set_fail_writes(true);
        f.publisher.set_fail_publishes(true);

        let report = f.detector.process(&reading(20, 500.0)).await;
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.sink_failures, 1);
        assert_eq!(report.publish_failures, 1);

        f.sink.set_fail_writes(false);
        f.publisher.set_fail_publishes(false);
        assert!(f.detector.process(&reading(21, 100.0)).await.anomalies.is_empty());
        assert!(f.sink.alerts().await.is_empty());
    }

    #[tokio::test]
    async fn cleanup_purges_and_announces_inactive_devices() {
        let f = fixture();
        f.detector.process(&reading(1_000, 1.0)).await;
        let mut sub = f.hub.register();

        assert_eq!(f.detector.cleanup(1_000 + DAY_MS), 0);
        assert_eq!(f.detector.cleanup(1_001 + DAY_MS), 1);
        assert_eq!(f.detector.snapshot(), DetectorSnapshot::default());

        let event = next_event(&mut sub);
        assert_eq!(event["type"], "device_status");
        assert_eq!(event["data"]["status"], "inactive");
        assert_eq!(event["data"]["last_seen"], 1_000);
    }

    #[tokio::test]
    async fn snapshot_and_stats() {
        let f = fixture();
        for (i, v) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            f.detector.process(&reading(i as i64, v)).await;
        }
        let stats = f.detector.stats("pump-3", "pressure").unwrap();
        assert_eq!(stats.mean, 20.0);
        assert!((stats.stddev - 10.0).abs() < 1e-9);
        assert_eq!(f.detector.snapshot(), DetectorSnapshot { devices: 1, series: 1 });
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = DetectorConfig {
            min_samples: 0,
            ..Default::default()
        };
        let result = AnomalyDetector::new(
            config,
            Arc::new(InMemorySink::new()),
            Arc::new(InMemoryPublisher::new("alerts")),
        );
        assert!(result.is_err());
    }
}
