//! Pipeline metrics

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use vigil_aggregator::FlushReport;
use vigil_anomaly::DetectionReport;

use crate::error::ApiResult;

/// Counters for the consumers, flush timer, detector and hub.
///
/// Owns its registry so several pipelines can live in one process.
pub struct PipelineMetrics {
    registry: Registry,

    /// Records decoded and handled, by consumer
    pub messages_processed: IntCounterVec,

    /// Records dropped as undecodable, by consumer
    pub decode_errors: IntCounterVec,

    /// Failed reads from the telemetry stream, by consumer
    pub stream_errors: IntCounterVec,

    /// Decoded samples a processor refused, by consumer
    pub samples_rejected: IntCounterVec,

    /// Windows drained by flush passes
    pub windows_flushed: IntCounter,

    /// Anomalies raised, by severity
    pub alerts_raised: IntCounterVec,

    /// Failed sink or publisher calls, by operation
    pub sink_failures: IntCounterVec,

    /// Devices whose statistics were purged for inactivity
    pub stats_purged: IntCounter,

    /// Live subscribers currently connected
    pub hub_subscribers: IntGauge,
}

impl PipelineMetrics {
    /// Create and register pipeline metrics
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_processed = IntCounterVec::new(
            Opts::new("vigil_messages_processed_total", "Telemetry records handled"),
            &["consumer"],
        )
        .expect("Failed to create messages_processed metric");
        registry
            .register(Box::new(messages_processed.clone()))
            .expect("Failed to register messages_processed");

        let decode_errors = IntCounterVec::new(
            Opts::new("vigil_decode_errors_total", "Undecodable telemetry records"),
            &["consumer"],
        )
        .expect("Failed to create decode_errors metric");
        registry
            .register(Box::new(decode_errors.clone()))
            .expect("Failed to register decode_errors");

        let stream_errors = IntCounterVec::new(
            Opts::new("vigil_stream_errors_total", "Failed telemetry stream reads"),
            &["consumer"],
        )
        .expect("Failed to create stream_errors metric");
        registry
            .register(Box::new(stream_errors.clone()))
            .expect("Failed to register stream_errors");

        let samples_rejected = IntCounterVec::new(
            Opts::new("vigil_samples_rejected_total", "Decoded samples refused by a processor"),
            &["consumer"],
        )
        .expect("Failed to create samples_rejected metric");
        registry
            .register(Box::new(samples_rejected.clone()))
            .expect("Failed to register samples_rejected");

        let windows_flushed =
            IntCounter::new("vigil_windows_flushed_total", "Aggregation windows flushed")
                .expect("Failed to create windows_flushed metric");
        registry
            .register(Box::new(windows_flushed.clone()))
            .expect("Failed to register windows_flushed");

        let alerts_raised = IntCounterVec::new(
            Opts::new("vigil_alerts_raised_total", "Anomalies raised"),
            &["severity"],
        )
        .expect("Failed to create alerts_raised metric");
        registry
            .register(Box::new(alerts_raised.clone()))
            .expect("Failed to register alerts_raised");

        let sink_failures = IntCounterVec::new(
            Opts::new("vigil_sink_failures_total", "Failed sink and publisher calls"),
            &["operation"],
        )
        .expect("Failed to create sink_failures metric");
        registry
            .register(Box::new(sink_failures.clone()))
            .expect("Failed to register sink_failures");

        let stats_purged = IntCounter::new(
            "vigil_stats_purged_total",
            "Devices purged from the detector for inactivity",
        )
        .expect("Failed to create stats_purged metric");
        registry
            .register(Box::new(stats_purged.clone()))
            .expect("Failed to register stats_purged");

        let hub_subscribers = IntGauge::new("vigil_hub_subscribers", "Connected live subscribers")
            .expect("Failed to create hub_subscribers metric");
        registry
            .register(Box::new(hub_subscribers.clone()))
            .expect("Failed to register hub_subscribers");

        Self {
            registry,
            messages_processed,
            decode_errors,
            stream_errors,
            samples_rejected,
            windows_flushed,
            alerts_raised,
            sink_failures,
            stats_purged,
            hub_subscribers,
        }
    }

    pub fn record_processed(&self, consumer: &str) {
        self.messages_processed.with_label_values(&[consumer]).inc();
    }

    pub fn record_decode_error(&self, consumer: &str) {
        self.decode_errors.with_label_values(&[consumer]).inc();
    }

    pub fn record_stream_error(&self, consumer: &str) {
        self.stream_errors.with_label_values(&[consumer]).inc();
    }

    pub fn record_rejected(&self, consumer: &str) {
        self.samples_rejected.with_label_values(&[consumer]).inc();
    }

    pub fn record_sink_failure(&self, operation: &str) {
        self.sink_failures.with_label_values(&[operation]).inc();
    }

    /// Record the outcome of a flush pass
    pub fn record_flush(&self, report: &FlushReport) {
        self.windows_flushed.inc_by(report.windows as u64);
        if report.sink_failures > 0 {
            self.sink_failures
                .with_label_values(&["insert_aggregates"])
                .inc_by(report.sink_failures as u64);
        }
        if report.publish_failures > 0 {
            self.sink_failures
                .with_label_values(&["publish_aggregate"])
                .inc_by(report.publish_failures as u64);
        }
    }

    /// Record the anomalies of one sample and their delivery failures
    pub fn record_detection(&self, report: &DetectionReport) {
        for anomaly in &report.anomalies {
            self.alerts_raised
                .with_label_values(&[anomaly.severity.as_str()])
                .inc();
        }
        if report.sink_failures > 0 {
            self.sink_failures
                .with_label_values(&["insert_alert"])
                .inc_by(report.sink_failures as u64);
        }
        if report.publish_failures > 0 {
            self.sink_failures
                .with_label_values(&["publish_alert"])
                .inc_by(report.publish_failures as u64);
        }
    }

    pub fn set_subscribers(&self, count: usize) {
        self.hub_subscribers.set(count as i64);
    }

    /// Export in Prometheus text format
    pub fn export(&self) -> ApiResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_anomaly::Anomaly;
    use vigil_types::Severity;

    fn anomaly(severity: Severity) -> Anomaly {
        Anomaly {
            device_id: "dev".into(),
            timestamp: 0,
            metric_name: "temperature".into(),
            value: 90.0,
            expected_range: [18.0, 26.0],
            severity,
            z_score: 6.0,
        }
    }

    #[test]
    fn test_record_flush() {
        let metrics = PipelineMetrics::new();
        metrics.record_flush(&FlushReport {
            windows: 3,
            records: 6,
            sink_failures: 1,
            publish_failures: 0,
            broadcasts: 0,
        });
        assert_eq!(metrics.windows_flushed.get(), 3);
        assert_eq!(
            metrics
                .sink_failures
                .with_label_values(&["insert_aggregates"])
                .get(),
            1
        );
    }

    #[test]
    fn test_record_detection_by_severity() {
        let metrics = PipelineMetrics::new();
        metrics.record_detection(&DetectionReport {
            anomalies: vec![anomaly(Severity::High), anomaly(Severity::High), anomaly(Severity::Low)],
            sink_failures: 0,
            publish_failures: 2,
        });
        assert_eq!(metrics.alerts_raised.with_label_values(&["high"]).get(), 2);
        assert_eq!(metrics.alerts_raised.with_label_values(&["low"]).get(), 1);
        assert_eq!(
            metrics.sink_failures.with_label_values(&["publish_alert"]).get(),
            2
        );
    }

    #[test]
    fn test_export() {
        let metrics = PipelineMetrics::new();
        metrics.record_processed("aggregator");
        metrics.set_subscribers(4);

        let output = metrics.export().unwrap();
        assert!(output.contains("vigil_messages_processed_total{consumer=\"aggregator\"} 1"));
        assert!(output.contains("vigil_hub_subscribers 4"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = PipelineMetrics::new();
        let b = PipelineMetrics::new();
        a.stats_purged.inc();
        assert_eq!(b.stats_purged.get(), 0);
    }
}
