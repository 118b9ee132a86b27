//! Prometheus scrape endpoint

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::api::state::AppState;
use crate::error::ApiResult;

/// Handler for GET /metrics
pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    state.metrics.set_subscribers(state.hub.subscriber_count());
    let body = state.metrics.export()?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}
