//! API route modules.

pub mod events;
pub mod health;
pub mod logging;
pub mod streams;

use axum::Router;
use tower_http::services::ServeDir;

use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let hls = ServeDir::new(&state.hls_root);

    Router::new()
        .merge(streams::control_router())
        .merge(events::router())
        .nest("/api/streams", streams::query_router())
        .nest("/api/logging", logging::router())
        .nest("/health", health::router())
        .nest_service("/hls", hls)
        .with_state(state)
}
