//! Queue Storage
//!
//! Durable append/read/update of [`QueueItem`]s behind the [`QueueStore`]
//! trait. No business logic lives here: the delivery state machine is in
//! `sync::queue`, which is the only writer of status fields.
//!
//! - [`SledQueueStore`]: sled-backed, survives restarts
//! - [`InMemoryQueueStore`]: for tests and dry runs

mod memory;
mod sled_store;
pub mod lockfile;

pub use lockfile::ProcessLock;
pub use memory::InMemoryQueueStore;
pub use sled_store::SledQueueStore;

use chrono::{DateTime, Utc};

use crate::types::{PayloadType, QueueItem, QueueStatus};

/// Pluggable persistence for queue items.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across the drain loop, the scheduler and API handlers.
pub trait QueueStore: Send + Sync {
    /// Reserve the next item id. Ids increase monotonically and are never
    /// handed out twice, including across restarts.
    fn allocate_id(&self) -> Result<u64, StoreError>;

    /// Persist a new item under its id.
    fn append(&self, item: &QueueItem) -> Result<(), StoreError>;

    /// Fetch one item.
    fn get(&self, id: u64) -> Result<Option<QueueItem>, StoreError>;

    /// Apply `update` atomically and return the updated item.
    ///
    /// Fails with [`StoreError::StatusConflict`] when `update.expect_status`
    /// does not match the stored status.
    fn update(&self, id: u64, update: &ItemUpdate) -> Result<QueueItem, StoreError>;

    /// Items matching `filter`, ascending by id.
    fn query(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, StoreError>;

    /// Delete items in `status` whose reference time (`sent_at`, falling
    /// back to `created_at`) is before `cutoff`. Returns the number deleted.
    fn delete_before(&self, status: QueueStatus, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Field changes applied by [`QueueStore::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemUpdate {
    /// Compare-and-set guard on the current status
    pub expect_status: Option<QueueStatus>,
    pub status: Option<QueueStatus>,
    pub retry_count: Option<u32>,
    pub sent_at: Option<Option<DateTime<Utc>>>,
    pub last_error: Option<Option<String>>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
}

impl ItemUpdate {
    /// Status change guarded by the expected current status.
    pub fn transition(from: QueueStatus, to: QueueStatus) -> Self {
        Self {
            expect_status: Some(from),
            status: Some(to),
            ..Self::default()
        }
    }

    /// Check the guard and write the changes into `item`.
    pub fn apply_to(&self, item: &mut QueueItem) -> Result<(), StoreError> {
        if let Some(expected) = self.expect_status {
            if item.status != expected {
                return Err(StoreError::StatusConflict {
                    id: item.id,
                    expected,
                    actual: item.status,
                });
            }
        }
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            item.retry_count = retry_count;
        }
        if let Some(sent_at) = self.sent_at {
            item.sent_at = sent_at;
        }
        if let Some(last_error) = &self.last_error {
            item.last_error.clone_from(last_error);
        }
        if let Some(next_attempt_at) = self.next_attempt_at {
            item.next_attempt_at = next_attempt_at;
        }
        Ok(())
    }
}

/// Selection for [`QueueStore::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    /// Empty matches every status
    pub statuses: Vec<QueueStatus>,
    pub payload_type: Option<PayloadType>,
    /// Applied after filtering, keeping the lowest ids
    pub limit: Option<usize>,
}

impl QueueFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn status(status: QueueStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &QueueItem) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&item.status))
            && self.payload_type.map_or(true, |t| t == item.payload_type)
    }
}

/// Reference time used by `delete_before`.
pub(crate) fn reference_time(item: &QueueItem) -> DateTime<Utc> {
    item.sent_at.unwrap_or(item.created_at)
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("queue item {0} not found")]
    NotFound(u64),
    #[error("queue item {id} already exists")]
    Duplicate { id: u64 },
    #[error("queue item {id} is {actual}, expected {expected}")]
    StatusConflict {
        id: u64,
        expected: QueueStatus,
        actual: QueueStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: QueueStatus) -> QueueItem {
        let mut item = QueueItem::new(7, "t", "f", PayloadType::Summary, serde_json::json!({}), Utc::now());
        item.status = status;
        item
    }

    #[test]
    fn test_guarded_update_rejects_wrong_status() {
        let mut it = item(QueueStatus::Sent);
        let err = ItemUpdate::transition(QueueStatus::Pending, QueueStatus::Sending)
            .apply_to(&mut it)
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusConflict { id: 7, .. }));
        assert_eq!(it.status, QueueStatus::Sent);
    }

    #[test]
    fn test_update_clears_optional_fields() {
        let mut it = item(QueueStatus::Sending);
        it.last_error = Some("timeout".into());

        let update = ItemUpdate {
            last_error: Some(None),
            ..ItemUpdate::transition(QueueStatus::Sending, QueueStatus::Sent)
        };
        update.apply_to(&mut it).unwrap();
        assert_eq!(it.status, QueueStatus::Sent);
        assert!(it.last_error.is_none());
    }

    #[test]
    fn test_filter_matching() {
        let it = item(QueueStatus::Failed);
        assert!(QueueFilter::all().matches(&it));
        assert!(QueueFilter::status(QueueStatus::Failed).matches(&it));
        assert!(!QueueFilter::status(QueueStatus::Pending).matches(&it));

        let by_type = QueueFilter {
            payload_type: Some(PayloadType::Emergency),
            ..QueueFilter::default()
        };
        assert!(!by_type.matches(&it));
    }
}
