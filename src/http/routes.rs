//! HTTP Route Definitions

use axum::routing::get;
use axum::Router;

use super::handlers::{self, AppState};

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/key",
            get(handlers::get_key)
                .put(handlers::put_key)
                .delete(handlers::delete_key),
        )
        .route("/search", get(handlers::search))
        .route("/ingestion-delay", get(handlers::ingestion_delay))
        .with_state(state);

    // Mount under /api/v1
    Router::new().nest("/api/v1", api_v1)
}
