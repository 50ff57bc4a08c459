//! Route table for the sync API.

use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use crate::sync::SyncService;

/// Routes nested under `/api/paraclate`.
pub fn api_routes(service: SyncService) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        // Queue (fixed paths before the parameterized retry route)
        .route("/queue", get(handlers::list_queue).post(handlers::enqueue))
        .route("/queue/purge", post(handlers::purge_queue))
        .route("/queue/drain", post(handlers::drain_queue))
        .route("/queue/:id/retry", post(handlers::retry_item))
        // Connection
        .route("/connect", post(handlers::connect))
        .route("/disconnect", post(handlers::disconnect))
        // Config
        .route("/config", get(handlers::get_config).put(handlers::update_config))
        .with_state(service)
}

/// Liveness endpoint at `/health`.
pub fn health_routes() -> Router {
    Router::new().route("/health", get(handlers::health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SharedConfig, SyncConfig};
    use crate::storage::InMemoryQueueStore;
    use crate::testing::ScriptedSender;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_service() -> SyncService {
        SyncService::builder(
            SharedConfig::new(SyncConfig::default()),
            Arc::new(InMemoryQueueStore::new()),
            Arc::new(ScriptedSender::new()),
        )
        .build()
    }

    #[tokio::test]
    async fn test_health() {
        let response = health_routes()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status() {
        let response = api_routes(create_test_service())
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_retry_unknown_item_is_404() {
        let response = api_routes(create_test_service())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/queue/42/retry")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_status_filter_is_400() {
        let response = api_routes(create_test_service())
            .oneshot(Request::builder().uri("/queue?status=lost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
