//! Consumer loops, periodic timers and their wiring
//!
//! ```text
//!                 ┌─► run_consumer(aggregator source) ─► AggregationHandler ─► Aggregator
//!   raw topic ────┤                                                              ▲ flush timer
//!                 └─► run_consumer(detector source)   ─► DetectionHandler   ─► AnomalyDetector
//!                                                                                ▲ cleanup timer
//! ```
//!
//! The two consumers never share state; each reads its own subscription in
//! arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vigil_aggregator::{Aggregator, FlushReport};
use vigil_anomaly::AnomalyDetector;
use vigil_hub::BroadcastHub;
use vigil_sink::{Publisher, Sink};
use vigil_types::{decode, now_millis, TelemetrySample, WireFormat};

use crate::config::DaemonConfig;
use crate::error::{DaemonResult, StreamError};
use crate::metrics::PipelineMetrics;
use crate::stream::TelemetrySource;

/// Name of the aggregation consumer (metrics label, consumer group suffix).
pub const AGGREGATOR_CONSUMER: &str = "aggregator";
/// Name of the detection consumer.
pub const DETECTOR_CONSUMER: &str = "detector";

/// What a consumer does with each decoded sample.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, sample: &TelemetrySample);
}

/// Folds samples into windows and records device liveness.
pub struct AggregationHandler {
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn Sink>,
    metrics: Arc<PipelineMetrics>,
}

impl AggregationHandler {
    pub fn new(aggregator: Arc<Aggregator>, sink: Arc<dyn Sink>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            aggregator,
            sink,
            metrics,
        }
    }
}

#[async_trait]
impl RecordHandler for AggregationHandler {
    fn name(&self) -> &'static str {
        AGGREGATOR_CONSUMER
    }

    async fn handle(&self, sample: &TelemetrySample) {
        if let Err(e) = self.aggregator.ingest(sample) {
            self.metrics.record_rejected(AGGREGATOR_CONSUMER);
            warn!(device_id = %sample.device_id, error = %e, "Dropping sample");
            return;
        }

        if let Err(e) = self.sink.touch_device(&sample.device_id).await {
            self.metrics.record_sink_failure("touch_device");
            warn!(device_id = %sample.device_id, error = %e, "Failed to update device last seen");
        }
    }
}

/// Scores samples and delivers the anomalies they raise.
pub struct DetectionHandler {
    detector: Arc<AnomalyDetector>,
    metrics: Arc<PipelineMetrics>,
}

impl DetectionHandler {
    pub fn new(detector: Arc<AnomalyDetector>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { detector, metrics }
    }
}

#[async_trait]
impl RecordHandler for DetectionHandler {
    fn name(&self) -> &'static str {
        DETECTOR_CONSUMER
    }

    async fn handle(&self, sample: &TelemetrySample) {
        let report = self.detector.process(sample).await;
        self.metrics.record_detection(&report);
    }
}

/// Totals for one consumer run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerReport {
    pub processed: u64,
    pub decode_errors: u64,
    pub read_errors: u64,
}

/// Read, decode and handle records in arrival order until shutdown or end
/// of stream.
///
/// Undecodable records are dropped. Read errors are retried immediately.
pub async fn run_consumer(
    mut source: Box<dyn TelemetrySource>,
    handler: Arc<dyn RecordHandler>,
    wire_format: WireFormat,
    metrics: Arc<PipelineMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> ConsumerReport {
    let name = handler.name();
    let mut report = ConsumerReport::default();
    info!(consumer = name, ?wire_format, "Consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            next = source.next_record() => next,
        };

        match next {
            Ok(Some(record)) => match decode(&record.payload, wire_format) {
                Ok(sample) => {
                    handler.handle(&sample).await;
                    report.processed += 1;
                    metrics.record_processed(name);
                }
                Err(e) => {
                    report.decode_errors += 1;
                    metrics.record_decode_error(name);
                    warn!(
                        consumer = name,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Dropping undecodable record"
                    );
                }
            },
            Ok(None) | Err(StreamError::Closed) => {
                info!(consumer = name, "Telemetry stream ended");
                break;
            }
            Err(e) => {
                report.read_errors += 1;
                metrics.record_stream_error(name);
                error!(consumer = name, error = %e, "Failed to read telemetry");
                tokio::task::yield_now().await;
            }
        }
    }

    info!(
        consumer = name,
        processed = report.processed,
        decode_errors = report.decode_errors,
        read_errors = report.read_errors,
        "Consumer stopped"
    );
    report
}

/// Flush closed windows every `flush_interval`.
pub async fn run_flush_timer(
    aggregator: Arc<Aggregator>,
    metrics: Arc<PipelineMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = aggregator.config().flush_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let report = aggregator.flush(now_millis()).await;
                metrics.record_flush(&report);
            }
        }
    }
    debug!("Flush timer stopped");
}

/// Purge inactive devices every `cleanup_interval`.
pub async fn run_cleanup_timer(
    detector: Arc<AnomalyDetector>,
    metrics: Arc<PipelineMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = detector.config().cleanup_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let purged = detector.cleanup(now_millis());
                metrics.stats_purged.inc_by(purged as u64);
                if purged > 0 {
                    info!(purged, "Inactive devices purged");
                }
            }
        }
    }
    debug!("Cleanup timer stopped");
}

/// Handles to the running pipeline tasks.
pub struct PipelineTasks {
    aggregation: JoinHandle<ConsumerReport>,
    detection: JoinHandle<ConsumerReport>,
    flush_timer: JoinHandle<()>,
    cleanup_timer: JoinHandle<()>,
}

/// How the pipeline ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub aggregation: ConsumerReport,
    pub detection: ConsumerReport,
    /// Present when `aggregator.flush_on_shutdown` is set.
    pub final_flush: Option<FlushReport>,
}

/// The aggregator, detector and hub wired to one sink and two publishers.
pub struct Pipeline {
    pub aggregator: Arc<Aggregator>,
    pub detector: Arc<AnomalyDetector>,
    pub hub: Arc<BroadcastHub>,
    pub metrics: Arc<PipelineMetrics>,
    sink: Arc<dyn Sink>,
    wire_format: WireFormat,
}

impl Pipeline {
    pub fn new(
        config: &DaemonConfig,
        sink: Arc<dyn Sink>,
        aggregates: Arc<dyn Publisher>,
        alerts: Arc<dyn Publisher>,
    ) -> DaemonResult<Self> {
        let hub = Arc::new(BroadcastHub::new(config.hub.buffer));

        let aggregator = Aggregator::new(config.aggregator.clone(), sink.clone(), aggregates)?
            .with_hub(hub.clone());
        let detector = AnomalyDetector::new(config.detector.clone(), sink.clone(), alerts)?
            .with_hub(hub.clone());

        Ok(Self {
            aggregator: Arc::new(aggregator),
            detector: Arc::new(detector),
            hub,
            metrics: Arc::new(PipelineMetrics::new()),
            sink,
            wire_format: config.stream.wire_format,
        })
    }

    /// Start both consumers and both timers.
    pub fn spawn(
        &self,
        aggregator_source: Box<dyn TelemetrySource>,
        detector_source: Box<dyn TelemetrySource>,
        shutdown: watch::Receiver<bool>,
    ) -> PipelineTasks {
        let aggregation_handler: Arc<dyn RecordHandler> = Arc::new(AggregationHandler::new(
            self.aggregator.clone(),
            self.sink.clone(),
            self.metrics.clone(),
        ));
        let detection_handler: Arc<dyn RecordHandler> = Arc::new(DetectionHandler::new(
            self.detector.clone(),
            self.metrics.clone(),
        ));

        PipelineTasks {
            aggregation: tokio::spawn(run_consumer(
                aggregator_source,
                aggregation_handler,
                self.wire_format,
                self.metrics.clone(),
                shutdown.clone(),
            )),
            detection: tokio::spawn(run_consumer(
                detector_source,
                detection_handler,
                self.wire_format,
                self.metrics.clone(),
                shutdown.clone(),
            )),
            flush_timer: tokio::spawn(run_flush_timer(
                self.aggregator.clone(),
                self.metrics.clone(),
                shutdown.clone(),
            )),
            cleanup_timer: tokio::spawn(run_cleanup_timer(
                self.detector.clone(),
                self.metrics.clone(),
                shutdown,
            )),
        }
    }

    /// Wait for every task to stop, then run the optional final flush.
    ///
    /// The shutdown signal must already have been sent, or the stream ended.
    pub async fn shutdown(&self, tasks: PipelineTasks) -> PipelineSummary {
        let mut summary = PipelineSummary {
            aggregation: join_consumer(AGGREGATOR_CONSUMER, tasks.aggregation).await,
            detection: join_consumer(DETECTOR_CONSUMER, tasks.detection).await,
            final_flush: None,
        };

        for (name, handle) in [("flush", tasks.flush_timer), ("cleanup", tasks.cleanup_timer)] {
            if let Err(e) = handle.await {
                error!(timer = name, error = %e, "Timer task failed");
            }
        }

        if self.aggregator.config().flush_on_shutdown {
            let report = self.aggregator.flush_all().await;
            self.metrics.record_flush(&report);
            info!(windows = report.windows, "Final flush complete");
            summary.final_flush = Some(report);
        } else {
            let open = self.aggregator.snapshot().open_windows;
            if open > 0 {
                warn!(open_windows = open, "Discarding unflushed windows");
            }
        }

        summary
    }
}

async fn join_consumer(name: &str, handle: JoinHandle<ConsumerReport>) -> ConsumerReport {
    match handle.await {
        Ok(report) => report,
        Err(e) => {
            error!(consumer = name, error = %e, "Consumer task failed");
            ConsumerReport::default()
        }
    }
}
