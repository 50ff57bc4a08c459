//! REST API module using Axum
//!
//! HTTP projection of the sync service for the device UI:
//! - `/health` liveness
//! - `/api/paraclate/*` status, queue, connection and config endpoints
//!
//! Responses use the envelope in [`envelope`].

pub mod envelope;
pub mod handlers;
mod routes;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::defaults;
use crate::sync::SyncService;

/// Env var with comma-separated origins allowed to call the API cross-origin.
pub const CORS_ORIGINS_ENV_VAR: &str = "PARACLATE_CORS_ORIGINS";

/// Restrictive by default (same-origin only).
///
/// Set `PARACLATE_CORS_ORIGINS` for a UI served from another origin, e.g.
/// `http://localhost:5173` during development.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    match std::env::var(CORS_ORIGINS_ENV_VAR) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the complete application router.
pub fn create_app(service: SyncService) -> Router {
    Router::new()
        .nest("/api/paraclate", routes::api_routes(service))
        .merge(routes::health_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(defaults::MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer())
}
