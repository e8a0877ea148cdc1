//! Liveness and readiness probes.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Probe response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Pending jobs on the tiles queue.
    pub tiles_queue_depth: u64,
}

/// GET /liveness
///
/// Fails once the request consumer has stopped on a fatal error, or when the
/// queue store does not answer a depth query.
pub async fn liveness(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    probe(&state).await.map(Json)
}

/// GET /readiness
pub async fn readiness(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    probe(&state).await.map(Json)
}

async fn probe(state: &AppState) -> ApiResult<HealthResponse> {
    if let Some(consumer) = &state.consumer
        && consumer.has_failed()
    {
        return Err(ApiError::Unavailable(
            "request consumer stopped after a queue store error".to_string(),
        ));
    }

    let depth = state
        .queue
        .queue_depth(&state.names.tiles)
        .await
        .map_err(|e| ApiError::Unavailable(format!("queue store unavailable: {e}")))?;

    Ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tiles_queue_depth: depth,
    })
}
