//! Queue inspection and operator actions

use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::storage::QueueFilter;
use crate::sync::{DrainReport, SyncService};
use crate::types::{PayloadType, QueueItem, QueueStats, QueueStatus};

/// Default page size for `GET /queue`
const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1_000;

#[derive(Debug, Default, Deserialize)]
pub struct QueueListParams {
    /// Comma-separated statuses, e.g. `pending,failed`
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub payload_type: Option<String>,
    pub limit: Option<usize>,
}

impl QueueListParams {
    fn filter(&self) -> Result<QueueFilter, String> {
        let statuses = match &self.status {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect::<Result<Vec<QueueStatus>, String>>()?,
            None => Vec::new(),
        };
        let payload_type = self
            .payload_type
            .as_deref()
            .map(str::parse::<PayloadType>)
            .transpose()?;

        Ok(QueueFilter {
            statuses,
            payload_type,
            limit: Some(self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct QueueListResponse {
    pub stats: QueueStats,
    pub items: Vec<QueueItem>,
}

/// GET /api/paraclate/queue - Items plus aggregate counts
pub async fn list_queue(State(service): State<SyncService>, Query(params): Query<QueueListParams>) -> Response {
    let filter = match params.filter() {
        Ok(filter) => filter,
        Err(e) => return ApiErrorResponse::bad_request(e),
    };
    let result = service
        .stats()
        .and_then(|stats| Ok(QueueListResponse { stats, items: service.items(&filter)? }));
    match result {
        Ok(body) => ApiResponse::ok(body),
        Err(e) => ApiErrorResponse::from_queue(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub payload_type: PayloadType,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub id: u64,
}

/// POST /api/paraclate/queue - Enqueue a payload (events and emergencies from the device)
pub async fn enqueue(
    State(service): State<SyncService>,
    axum::Json(request): axum::Json<EnqueueRequest>,
) -> Response {
    match service.enqueue(request.payload_type, request.payload) {
        Ok(id) => ApiResponse::created(EnqueueResponse { id }),
        Err(e) => ApiErrorResponse::from_queue(&e),
    }
}

/// POST /api/paraclate/queue/:id/retry - Return a failed item to pending
pub async fn retry_item(State(service): State<SyncService>, Path(id): Path<u64>) -> Response {
    match service.retry_failed(id) {
        Ok(item) => ApiResponse::ok(item),
        Err(e) => ApiErrorResponse::from_queue(&e),
    }
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub deleted: usize,
}

/// POST /api/paraclate/queue/purge - Delete sent items past retention
pub async fn purge_queue(State(service): State<SyncService>) -> Response {
    match service.purge_old() {
        Ok(deleted) => ApiResponse::ok(PurgeResponse { deleted }),
        Err(e) => ApiErrorResponse::from_queue(&e),
    }
}

/// POST /api/paraclate/queue/drain - Run a drain pass now
pub async fn drain_queue(State(service): State<SyncService>) -> Response {
    match service.drain().await {
        Ok(report) => ApiResponse::<DrainReport>::ok(report),
        Err(e) => ApiErrorResponse::from_queue(&e),
    }
}
