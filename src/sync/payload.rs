//! Report payload construction
//!
//! The scheduler decides *when* a report is due; a [`PayloadBuilder`] decides
//! what goes in it. The default builder reports queue and link health for the
//! window, which is what the remote dashboard expects when nothing richer is
//! plugged in.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::SlotTime;
use crate::types::{ConnectionStatus, PayloadType, QueueStats};

/// Everything a builder needs to produce one report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRequest {
    pub kind: PayloadType,
    pub tenant_id: String,
    pub facility_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Grand summary slot that triggered this report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotTime>,
    pub queue_stats: QueueStats,
    pub connection_status: ConnectionStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("no data available for report window")]
    NoData,
    #[error("payload build failed: {0}")]
    Build(String),
}

/// Produces report bodies for scheduled payloads.
pub trait PayloadBuilder: Send + Sync {
    fn build(&self, request: &ReportRequest) -> Result<serde_json::Value, PayloadError>;
}

/// Queue and connection health as the report body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPayloadBuilder;

impl PayloadBuilder for DefaultPayloadBuilder {
    fn build(&self, request: &ReportRequest) -> Result<serde_json::Value, PayloadError> {
        let mut body = serde_json::to_value(request).map_err(|e| PayloadError::Build(e.to_string()))?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "window_minutes".to_string(),
                serde_json::json!((request.window_end - request.window_start).num_minutes()),
            );
        }
        Ok(body)
    }
}
