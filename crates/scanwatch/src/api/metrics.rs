//! Run counters endpoint.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use scanwatch_core::summary::elapsed_secs;
use scanwatch_core::MetricsSnapshot;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Counters plus run duration.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsResponse {
    /// Whole seconds since the run started, at least 1.
    #[schema(example = 120)]
    pub elapsed_secs: u64,

    /// Counter snapshot.
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
}

/// Current run counters.
#[utoipa::path(
    get,
    path = "/api/metrics",
    tag = "metrics",
    operation_id = "getMetrics",
    summary = "Get run counters",
    description = "Returns the same counters the periodic summary prints. Per-kind and \
        per-device lists are in first-seen order; sort them client-side for rankings.",
    responses(
        (status = 200, description = "Current counters", body = MetricsResponse)
    )
)]
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let snapshot = state.snapshot();
    Json(MetricsResponse {
        elapsed_secs: elapsed_secs(snapshot.started_at, Utc::now()),
        snapshot,
    })
}
