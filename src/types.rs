//! Core data types for the Paraclate sync queue
//!
//! - **QueueItem**: one unit of outbound data and its delivery state
//! - **PayloadType**: what kind of report an item carries (drives priority)
//! - **QueueStatus**: delivery state machine position
//! - **ConnectionState**: link to the remote endpoint, as seen by the UI
//! - **QueueStats**: aggregate counts over the store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SlotTime;

// ============================================================================
// Payload Type
// ============================================================================

/// Kind of report carried by a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    /// Interval-based periodic summary
    Summary,
    /// Time-of-day scheduled aggregate report
    GrandSummary,
    /// Ordinary device/activity event
    Event,
    /// Emergency event, must never be silently dropped
    Emergency,
}

impl PayloadType {
    pub const ALL: [Self; 4] = [Self::Emergency, Self::GrandSummary, Self::Summary, Self::Event];

    /// Drain priority. Higher drains first.
    ///
    /// emergency > grand_summary > summary > event
    pub const fn priority(self) -> u8 {
        match self {
            Self::Emergency => 3,
            Self::GrandSummary => 2,
            Self::Summary => 1,
            Self::Event => 0,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::GrandSummary => "grand_summary",
            Self::Event => "event",
            Self::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PayloadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "grand_summary" => Ok(Self::GrandSummary),
            "event" => Ok(Self::Event),
            "emergency" => Ok(Self::Emergency),
            other => Err(format!("unknown payload type '{other}'")),
        }
    }
}

// ============================================================================
// Queue Status
// ============================================================================

/// Delivery state of a queue item.
///
/// `pending → sending → {sent | pending}`. `Failed` is the terminal sub-state
/// of pending: retries exhausted (or payload rejected) and waiting for an
/// explicit `retry_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown queue status '{other}'")),
        }
    }
}

// ============================================================================
// Queue Item
// ============================================================================

/// A unit of outbound data destined for the remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Store-assigned id, monotonically increasing, never reused
    pub id: u64,
    /// Tenant scope (immutable)
    pub tenant_id: String,
    /// Facility scope (immutable)
    pub facility_id: String,
    /// Report kind (immutable)
    pub payload_type: PayloadType,
    /// Body shipped to the remote endpoint
    pub payload: serde_json::Value,
    /// Delivery state
    pub status: QueueStatus,
    /// Number of failed send attempts so far
    pub retry_count: u32,
    /// Creation time (immutable)
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on transition into `sent`
    pub sent_at: Option<DateTime<Utc>>,
    /// Cause of the most recent failure
    pub last_error: Option<String>,
    /// Pending items are not eligible for a drain pick before this instant
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Grand summary slot this item was produced for (immutable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotTime>,
}

impl QueueItem {
    /// Build a fresh pending item. The id comes from the store.
    pub fn new(
        id: u64,
        tenant_id: impl Into<String>,
        facility_id: impl Into<String>,
        payload_type: PayloadType,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id: tenant_id.into(),
            facility_id: facility_id.into(),
            payload_type,
            payload,
            status: QueueStatus::Pending,
            retry_count: 0,
            created_at,
            sent_at: None,
            last_error: None,
            next_attempt_at: None,
            slot: None,
        }
    }

    /// Tag the item with the grand summary slot it was produced for.
    #[must_use]
    pub const fn with_slot(mut self, slot: Option<SlotTime>) -> Self {
        self.slot = slot;
        self
    }

    /// Whether the item may be picked by a drain pass at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Link status to the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
    Connecting,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Aggregate queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub sending: usize,
    pub failed: usize,
    /// Sent items whose `sent_at` falls on the current tenant-local day
    pub sent_today: usize,
}

/// Snapshot of the connection to the remote endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Derived: `connection_status == Connected`
    pub connected: bool,
    pub connection_status: ConnectionStatus,
    pub endpoint: Option<String>,
    pub facility_id: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub queue_stats: QueueStats,
}

/// Result of a `connect` attempt. Failures are reported here, not as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResult {
    pub success: bool,
    pub connected: bool,
    pub message: String,
    pub latency_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(PayloadType::Emergency.priority() > PayloadType::GrandSummary.priority());
        assert!(PayloadType::GrandSummary.priority() > PayloadType::Summary.priority());
        assert!(PayloadType::Summary.priority() > PayloadType::Event.priority());
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&PayloadType::GrandSummary).unwrap();
        assert_eq!(json, "\"grand_summary\"");
        assert_eq!("grand_summary".parse::<PayloadType>().unwrap(), PayloadType::GrandSummary);
        assert!("bogus".parse::<QueueStatus>().is_err());
    }

    #[test]
    fn test_eligibility_respects_backoff() {
        let now = Utc::now();
        let mut item = QueueItem::new(1, "t", "f", PayloadType::Event, serde_json::Value::Null, now);
        assert!(item.is_eligible(now));

        item.next_attempt_at = Some(now + chrono::Duration::seconds(10));
        assert!(!item.is_eligible(now));
        assert!(item.is_eligible(now + chrono::Duration::seconds(10)));

        item.status = QueueStatus::Failed;
        item.next_attempt_at = None;
        assert!(!item.is_eligible(now));
    }
}
