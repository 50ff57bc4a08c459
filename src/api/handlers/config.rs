//! Sync configuration endpoints

use axum::extract::State;
use axum::response::Response;

use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::config::{SyncConfig, SyncConfigUpdate};
use crate::sync::SyncService;

/// GET /api/paraclate/config - Active sync configuration
pub async fn get_config(State(service): State<SyncService>) -> Response {
    ApiResponse::<SyncConfig>::ok((*service.config()).clone())
}

/// PUT /api/paraclate/config - Validate and apply a partial update
///
/// Takes effect immediately and is written back to the config file when the
/// daemon was started from one. On a validation error nothing changes and
/// every problem is listed in `error.details`.
pub async fn update_config(
    State(service): State<SyncService>,
    axum::Json(update): axum::Json<SyncConfigUpdate>,
) -> Response {
    match service.update_config(&update) {
        Ok(updated) => ApiResponse::<SyncConfig>::ok((*updated).clone()),
        Err(e) => ApiErrorResponse::from_config(e),
    }
}
