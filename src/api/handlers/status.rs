//! Health and status endpoints

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Serialize;

use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::sync::SyncService;
use crate::types::ConnectionState;

/// Liveness response for `/health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health - Process is up and serving
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Combined view for the device UI
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub tenant_id: String,
    pub facility_id: String,
    pub report_interval_minutes: u32,
    pub connection: ConnectionState,
}

/// GET /api/paraclate/status - Connection state with queue counts
pub async fn get_status(State(service): State<SyncService>) -> Response {
    match service.connection_state() {
        Ok(connection) => {
            let config = service.config();
            ApiResponse::ok(StatusResponse {
                tenant_id: config.tid.clone(),
                facility_id: config.fid.clone(),
                report_interval_minutes: config.report_interval_minutes,
                connection,
            })
        }
        Err(e) => ApiErrorResponse::from_queue(&e),
    }
}
