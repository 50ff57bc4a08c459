//! Connect / disconnect endpoints

use axum::extract::State;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::sync::SyncService;
use crate::types::{ConnectResult, ConnectionState};

/// Both fields fall back to the configured values.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    pub endpoint: Option<String>,
    pub fid: Option<String>,
}

/// POST /api/paraclate/connect - Probe and attach to an endpoint
///
/// Probe failures are a normal result (`success: false`), not an HTTP error.
pub async fn connect(
    State(service): State<SyncService>,
    body: Option<axum::Json<ConnectRequest>>,
) -> Response {
    let request = body.map(|axum::Json(r)| r).unwrap_or_default();
    let result: ConnectResult = service
        .connect(request.endpoint.as_deref(), request.fid.as_deref())
        .await;
    ApiResponse::ok(result)
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub connection: ConnectionState,
}

/// POST /api/paraclate/disconnect - Detach; queued items wait for the next connect
pub async fn disconnect(State(service): State<SyncService>) -> Response {
    service.disconnect();
    match service.connection_state() {
        Ok(connection) => ApiResponse::ok(DisconnectResponse { connection }),
        Err(e) => ApiErrorResponse::from_queue(&e),
    }
}
