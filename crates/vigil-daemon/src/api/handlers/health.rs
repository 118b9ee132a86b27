//! Health and status handlers

use axum::{extract::State, Json};
use serde::Serialize;
use vigil_aggregator::AggregatorSnapshot;
use vigil_anomaly::DetectorSnapshot;

use crate::api::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub connected_clients: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let status = if *state.shutdown.borrow() {
        "shutting_down"
    } else {
        "healthy"
    };

    Json(HealthCheckResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        connected_clients: state.hub.subscriber_count(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub aggregator: AggregatorSnapshot,
    pub detector: DetectorSnapshot,
    pub stats: PipelineStats,
}

/// Pipeline counters
#[derive(Debug, Serialize)]
pub struct PipelineStats {
    pub connected_clients: usize,
    pub windows_flushed: u64,
    pub stats_purged: u64,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> Json<DaemonStatusResponse> {
    Json(DaemonStatusResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        aggregator: state.aggregator.snapshot(),
        detector: state.detector.snapshot(),
        stats: PipelineStats {
            connected_clients: state.hub.subscriber_count(),
            windows_flushed: state.metrics.windows_flushed.get(),
            stats_purged: state.metrics.stats_purged.get(),
        },
    })
}
