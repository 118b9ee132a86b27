//! Aggregator service: the locked window table plus its outputs.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use vigil_hub::BroadcastHub;
use vigil_sink::{Publisher, Sink};
use vigil_types::{now_millis, EventKind, TelemetrySample};

use crate::config::AggregatorConfig;
use crate::error::AggregatorResult;
use crate::window::{WindowAggregate, WindowKey, WindowTable};

/// Outcome of one flush pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Windows drained from the table.
    pub windows: usize,
    /// Per-metric rows handed to the sink.
    pub records: usize,
    pub sink_failures: usize,
    pub publish_failures: usize,
    /// Live subscribers that received the metric events.
    pub broadcasts: usize,
}

/// Read-only view for health and status reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorSnapshot {
    pub open_windows: usize,
    pub devices: usize,
}

/// Windowed aggregator.
///
/// Ingest and flush contend on one lock. A flush drains closed windows under
/// the write lock and performs all I/O after releasing it, so ingest is never
/// blocked on the sink.
pub struct Aggregator {
    config: AggregatorConfig,
    table: RwLock<WindowTable>,
    sink: Arc<dyn Sink>,
    publisher: Arc<dyn Publisher>,
    hub: Option<Arc<BroadcastHub>>,
}

impl Aggregator {
    pub fn new(
        config: AggregatorConfig,
        sink: Arc<dyn Sink>,
        publisher: Arc<dyn Publisher>,
    ) -> AggregatorResult<Self> {
        config.validate()?;
        let table = WindowTable::new(config.window_ms(), config.grace_period_ms());
        Ok(Self {
            config,
            table: RwLock::new(table),
            sink,
            publisher,
            hub: None,
        })
    }

    /// Push a `metric` event to live subscribers for every flushed window.
    pub fn with_hub(mut self, hub: Arc<BroadcastHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Fold a sample into its window.
    pub fn ingest(&self, sample: &TelemetrySample) -> AggregatorResult<WindowKey> {
        let key = self.table.write().ingest(sample, now_millis())?;
        debug!(
            device_id = %key.device_id,
            window_start = key.window_start,
            metrics = sample.metrics.len(),
            "Aggregated telemetry"
        );
        Ok(key)
    }

    /// Flush every window closed at `now_ms`.
    ///
    /// Delivery is at-most-once: a window is removed from the table before
    /// any output is attempted, and failed writes are logged, not retried.
    #[instrument(skip(self))]
    pub async fn flush(&self, now_ms: i64) -> FlushReport {
        let closed = self.table.write().drain_closed(now_ms);
        self.emit(closed).await
    }

    /// Flush every open window regardless of time.
    pub async fn flush_all(&self) -> FlushReport {
        let open = self.table.write().drain_all();
        self.emit(open).await
    }

    async fn emit(&self, windows: Vec<WindowAggregate>) -> FlushReport {
        let mut report = FlushReport {
            windows: windows.len(),
            ..Default::default()
        };
        if windows.is_empty() {
            return report;
        }

        for window in &windows {
            let records = window.to_records();
            let rows = records.len();
            match self.sink.insert_aggregates(records).await {
                Ok(()) => report.records += rows,
                Err(e) => {
                    report.sink_failures += 1;
                    warn!(
                        device_id = %window.device_id,
                        window_start = window.window_start,
                        error = %e,
                        "Failed to persist aggregate"
                    );
                }
            }

            let publish = window.to_publish();
            match serde_json::to_vec(&publish) {
                Ok(payload) => {
                    if let Err(e) = self.publisher.publish(&window.device_id, payload).await {
                        report.publish_failures += 1;
                        warn!(
                            device_id = %window.device_id,
                            topic = self.publisher.topic(),
                            error = %e,
                            "Failed to publish aggregate"
                        );
                    }
                }
                Err(e) => {
                    report.publish_failures += 1;
                    warn!(device_id = %window.device_id, error = %e, "Failed to encode aggregate");
                }
            }

            if let Some(hub) = &self.hub {
                match hub.broadcast_event(EventKind::Metric, &publish) {
                    Ok(delivery) => report.broadcasts += delivery.delivered,
                    Err(e) => warn!(device_id = %window.device_id, error = %e, "Failed to broadcast aggregate"),
                }
            }
        }

        info!(
            windows = report.windows,
            records = report.records,
            sink_failures = report.sink_failures,
            publish_failures = report.publish_failures,
            "Flushed aggregates"
        );
        report
    }

    /// Copy of an open window, if present.
    pub fn window(&self, device_id: &str, window_start: i64) -> Option<WindowAggregate> {
        self.table.read().get(device_id, window_start).cloned()
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        let table = self.table.read();
        AggregatorSnapshot {
            open_windows: table.open_windows(),
            devices: table.device_count(),
        }
    }
}
