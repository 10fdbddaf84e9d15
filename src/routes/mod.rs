//! Router assembly: read-only content API, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::ServerState;

pub mod http;

/// Build the application router with:
/// - Content API under `/api/v1/...` (metadata, lessons, modules)
/// - CORS (allow any origin, GET only) so browser readers can sync directly
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/metadata", get(http::http_get_metadata))
        .route("/api/v1/lessons", get(http::http_get_lessons))
        .route("/api/v1/lessons/:id", get(http::http_get_lesson))
        .route("/api/v1/modules", get(http::http_get_modules))
        .route("/api/v1/modules/:id", get(http::http_get_module))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([axum::http::Method::GET])
                        .allow_headers(Any),
                ),
        )
}
