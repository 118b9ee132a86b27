//! Application state for API handlers

use std::sync::Arc;

use tokio::sync::watch;
use vigil_aggregator::Aggregator;
use vigil_anomaly::AnomalyDetector;
use vigil_hub::BroadcastHub;

use crate::metrics::PipelineMetrics;
use crate::pipeline::Pipeline;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Live fan-out hub
    pub hub: Arc<BroadcastHub>,

    /// Windowed aggregator (read-only introspection)
    pub aggregator: Arc<Aggregator>,

    /// Anomaly detector (read-only introspection)
    pub detector: Arc<AnomalyDetector>,

    /// Pipeline metrics
    pub metrics: Arc<PipelineMetrics>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// Flips to `true` when the daemon is shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Create application state over a running pipeline
    pub fn new(pipeline: &Pipeline, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            hub: pipeline.hub.clone(),
            aggregator: pipeline.aggregator.clone(),
            detector: pipeline.detector.clone(),
            metrics: pipeline.metrics.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
            shutdown,
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        format_uptime(duration.num_seconds())
    }
}

fn format_uptime(secs: i64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
