//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/tiles/area", post(handlers::populate_area))
        .route("/tiles/list", post(handlers::populate_tiles))
        .route("/liveness", get(handlers::liveness))
        .route("/readiness", get(handlers::readiness));

    // Metrics are unauthenticated; keep the endpoint network-restricted.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
