//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/v1/health", get(handlers::health_check))
        // Chunked uploads
        .route("/v1/uploads", post(handlers::init_upload))
        .route("/v1/uploads/{upload_id}", get(handlers::get_upload_status))
        .route(
            "/v1/uploads/{upload_id}/chunks/{chunk_number}",
            put(handlers::upload_chunk),
        )
        // Artifacts
        .route("/v1/artifacts", post(handlers::store_text))
        .route("/v1/artifacts/files", post(handlers::store_file))
        .route(
            "/v1/artifacts/{id}",
            get(handlers::read_artifact).delete(handlers::burn_artifact),
        )
        .route(
            "/v1/artifacts/{id}/download",
            get(handlers::download_artifact),
        );

    // The metrics endpoint is unauthenticated; restrict it at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
