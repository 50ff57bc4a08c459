//! Queue Manager - delivery state machine for every enqueued item
//!
//! `pending → sending → {sent | pending}`, with `failed` as the terminal
//! sub-state of pending once the retry budget is spent or the remote rejects
//! the payload outright.
//!
//! ## Guarantees
//!
//! - Single-flight: one drain pass at a time, so at most one item is in
//!   `sending` for the endpoint. The remote may not be idempotent.
//! - Pick order: highest priority tier first, oldest id within a tier,
//!   re-evaluated before every pick so a fresh emergency jumps the line.
//! - Backoff is a persisted `next_attempt_at`, never a sleep inside a pass.
//! - Every status write is a compare-and-set on the expected status.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::connection::ConnectionTracker;
use super::sender::{SendError, Sender};
use crate::clock::Clock;
use crate::config::{QueueConfig, SharedConfig, SlotTime};
use crate::storage::{ItemUpdate, QueueFilter, QueueStore, StoreError};
use crate::types::{ConnectionState, PayloadType, QueueItem, QueueStats, QueueStatus};

/// Upper bound for a single backoff delay, whatever the config says.
const BACKOFF_CEILING_SECS: u64 = 86_400;

/// Store writes attempted for a send outcome before it is parked.
const OUTCOME_WRITE_ATTEMPTS: u32 = 3;

// ============================================================================
// Retry Policy
// ============================================================================

/// Retry budgets and exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub emergency_max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            emergency_max_retries: config.emergency_max_retries,
            base_delay_secs: config.base_delay_secs,
            max_delay_secs: config.max_delay_secs,
        }
    }
}

impl RetryPolicy {
    /// Failed attempts allowed before an item of this type turns terminal.
    pub const fn budget(&self, payload_type: PayloadType) -> u32 {
        match payload_type {
            PayloadType::Emergency => self.emergency_max_retries,
            _ => self.max_retries,
        }
    }

    /// Delay before the next attempt: `min(base * 2^retry_count, max)`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
        let secs = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs)
            .min(BACKOFF_CEILING_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(0))
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What one `drain()` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Another pass held the send slot; this call did nothing
    pub already_running: bool,
    /// Eligible work was left behind because the connection is not usable
    pub deferred: bool,
    pub sent: usize,
    /// Transient failures returned to pending with a backoff
    pub retry_scheduled: usize,
    /// Transient failures that spent the retry budget
    pub exhausted: usize,
    /// Payloads rejected by the remote
    pub rejected: usize,
}

impl DrainReport {
    pub const fn attempts(&self) -> usize {
        self.sent + self.retry_scheduled + self.exhausted + self.rejected
    }
}

/// Queue history over a window, consumed by attunement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    /// Items created in the window
    pub created: usize,
    pub sent: usize,
    /// Items that ended terminal
    pub failed: usize,
    /// Sum of failed attempts across the window's items
    pub failed_attempts: u64,
}

impl QueueHealth {
    pub const fn attempts(&self) -> u64 {
        self.sent as u64 + self.failed_attempts
    }

    /// Share of send attempts that failed, 0.0 with no attempts.
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            0.0
        } else {
            self.failed_attempts as f64 / attempts as f64
        }
    }
}

/// Queue errors surfaced to callers.
///
/// Send failures never show up here; they are absorbed into item state.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("queue item {0} not found or not in failed state")]
    NotFound(u64),
}

// ============================================================================
// Queue Manager
// ============================================================================

pub struct QueueManager {
    store: Arc<dyn QueueStore>,
    sender: Arc<dyn Sender>,
    connection: Arc<ConnectionTracker>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    /// Active-send slot; held for a whole drain pass
    send_slot: Mutex<()>,
    /// Send outcomes whose status write failed; replayed under the send slot
    unresolved: std::sync::Mutex<Vec<(u64, ItemUpdate)>>,
    wake: Notify,
}

impl QueueManager {
    pub fn new(
        store: Arc<dyn QueueStore>,
        sender: Arc<dyn Sender>,
        connection: Arc<ConnectionTracker>,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        info!(backend = store.backend_name(), ?policy, "Queue manager ready");
        Self {
            store,
            sender,
            connection,
            config,
            clock,
            policy,
            send_slot: Mutex::new(()),
            unresolved: std::sync::Mutex::new(Vec::new()),
            wake: Notify::new(),
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub const fn connection(&self) -> &Arc<ConnectionTracker> {
        &self.connection
    }

    /// Create a pending item scoped to the configured tenant/facility.
    ///
    /// Returns the new id and wakes the drain loop. Never waits on delivery.
    pub fn enqueue(&self, payload_type: PayloadType, payload: serde_json::Value) -> Result<u64, QueueError> {
        self.enqueue_for_slot(payload_type, payload, None)
    }

    /// [`enqueue`](Self::enqueue) for a scheduled report, recording the
    /// grand summary slot it belongs to.
    pub fn enqueue_for_slot(
        &self,
        payload_type: PayloadType,
        payload: serde_json::Value,
        slot: Option<SlotTime>,
    ) -> Result<u64, QueueError> {
        let config = self.config.get();
        let id = self.store.allocate_id()?;
        let item = QueueItem::new(id, &config.tid, &config.fid, payload_type, payload, self.clock.now()).with_slot(slot);
        self.store.append(&item)?;

        info!(id, %payload_type, tenant = %config.tid, facility = %config.fid, "Enqueued payload");
        self.wake.notify_one();
        Ok(id)
    }

    /// Deliver eligible pending items until none remain, the connection
    /// becomes unusable, or a transient failure ends the pass.
    ///
    /// A concurrent call returns at once with `already_running` set.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        let Ok(_slot) = self.send_slot.try_lock() else {
            debug!("Drain already in progress");
            return Ok(DrainReport {
                already_running: true,
                ..DrainReport::default()
            });
        };

        self.resolve_outcomes()?;

        let mut report = DrainReport::default();
        loop {
            let now = self.clock.now();
            let endpoint = match self.connection.endpoint() {
                Some(endpoint) if self.connection.is_usable() => endpoint,
                _ => {
                    report.deferred = self.next_eligible(now)?.is_some();
                    if report.deferred {
                        debug!(status = %self.connection.status(), "Connection not usable, deferring drain");
                    }
                    break;
                }
            };

            let Some(next) = self.next_eligible(now)? else {
                break;
            };

            let item = match self
                .store
                .update(next.id, &ItemUpdate::transition(QueueStatus::Pending, QueueStatus::Sending))
            {
                Ok(item) => item,
                // Changed under us (purged or retried elsewhere); pick again
                Err(StoreError::NotFound(_) | StoreError::StatusConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            debug!(id = item.id, payload_type = %item.payload_type, retry_count = item.retry_count, "Sending");
            let outcome = self.sender.send(&endpoint, &item).await;
            let finished_at = self.clock.now();

            match outcome {
                Ok(latency_ms) => {
                    self.connection.record_outcome(true, None, finished_at);
                    self.connection.record_latency(latency_ms);
                    self.mark_sent(&item, finished_at)?;
                    report.sent += 1;
                }
                Err(SendError::Terminal(message)) => {
                    self.mark_rejected(&item, &message)?;
                    report.rejected += 1;
                }
                Err(SendError::Transient(message)) => {
                    self.connection.record_outcome(false, Some(&message), finished_at);
                    let exhausted = self.mark_transient_failure(&item, &message, finished_at)?;
                    if exhausted {
                        report.exhausted += 1;
                    } else {
                        report.retry_scheduled += 1;
                    }
                    break;
                }
            }
        }

        if report.attempts() > 0 {
            info!(
                sent = report.sent,
                retry_scheduled = report.retry_scheduled,
                exhausted = report.exhausted,
                rejected = report.rejected,
                "Drain pass complete"
            );
        }
        Ok(report)
    }

    /// Highest-priority, oldest eligible pending item.
    fn next_eligible(&self, now: DateTime<Utc>) -> Result<Option<QueueItem>, QueueError> {
        let pending = self.store.query(&QueueFilter::status(QueueStatus::Pending))?;
        Ok(pending
            .into_iter()
            .filter(|item| item.is_eligible(now))
            .min_by_key(|item| (Reverse(item.payload_type.priority()), item.id)))
    }

    /// Persist the status change for a finished send.
    ///
    /// Transient store errors are retried. When every attempt fails the
    /// update is parked and the item stays `sending` until the next pass
    /// replays it; the send is never repeated.
    fn write_outcome(&self, id: u64, update: ItemUpdate) -> Result<QueueItem, QueueError> {
        let mut attempt = 1;
        loop {
            match self.store.update(id, &update) {
                Ok(item) => return Ok(item),
                Err(e @ (StoreError::NotFound(_) | StoreError::StatusConflict { .. })) => return Err(e.into()),
                Err(e) if attempt < OUTCOME_WRITE_ATTEMPTS => {
                    warn!(id, attempt, error = %e, "Status write failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    error!(id, error = %e, "Status write failed, outcome parked until next drain");
                    self.unresolved
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((id, update));
                    return Err(e.into());
                }
            }
        }
    }

    /// Replay parked send outcomes. Caller holds the send slot.
    fn resolve_outcomes(&self) -> Result<(), QueueError> {
        let parked = std::mem::take(&mut *self.unresolved.lock().unwrap_or_else(PoisonError::into_inner));
        let mut remaining = parked.into_iter();
        while let Some((id, update)) = remaining.next() {
            match self.store.update(id, &update) {
                Ok(item) => info!(id, status = %item.status, "Parked send outcome recorded"),
                Err(StoreError::NotFound(_) | StoreError::StatusConflict { .. }) => {
                    warn!(id, "Parked send outcome no longer applies, dropped");
                }
                Err(e) => {
                    let mut unresolved = self.unresolved.lock().unwrap_or_else(PoisonError::into_inner);
                    unresolved.push((id, update));
                    unresolved.extend(remaining);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn mark_sent(&self, item: &QueueItem, at: DateTime<Utc>) -> Result<(), QueueError> {
        self.write_outcome(
            item.id,
            ItemUpdate {
                sent_at: Some(Some(at)),
                last_error: Some(None),
                next_attempt_at: Some(None),
                ..ItemUpdate::transition(QueueStatus::Sending, QueueStatus::Sent)
            },
        )?;
        info!(id = item.id, payload_type = %item.payload_type, "Delivered");
        Ok(())
    }

    fn mark_rejected(&self, item: &QueueItem, message: &str) -> Result<(), QueueError> {
        let retry_count = item.retry_count.saturating_add(1);
        self.write_outcome(
            item.id,
            ItemUpdate {
                retry_count: Some(retry_count),
                last_error: Some(Some(message.to_string())),
                next_attempt_at: Some(None),
                ..ItemUpdate::transition(QueueStatus::Sending, QueueStatus::Failed)
            },
        )?;
        warn!(id = item.id, payload_type = %item.payload_type, error = message, "Payload rejected by remote, marked failed");
        Ok(())
    }

    /// Returns `true` when the retry budget is spent.
    fn mark_transient_failure(&self, item: &QueueItem, message: &str, at: DateTime<Utc>) -> Result<bool, QueueError> {
        let retry_count = item.retry_count.saturating_add(1);
        let budget = self.policy.budget(item.payload_type);

        if retry_count >= budget {
            self.write_outcome(
                item.id,
                ItemUpdate {
                    retry_count: Some(retry_count),
                    last_error: Some(Some(message.to_string())),
                    next_attempt_at: Some(None),
                    ..ItemUpdate::transition(QueueStatus::Sending, QueueStatus::Failed)
                },
            )?;
            warn!(
                id = item.id,
                payload_type = %item.payload_type,
                retry_count,
                error = message,
                "Retry budget exhausted, marked failed"
            );
            return Ok(true);
        }

        let delay = self.policy.backoff(retry_count);
        let next_attempt_at = at + delay;
        self.write_outcome(
            item.id,
            ItemUpdate {
                retry_count: Some(retry_count),
                last_error: Some(Some(message.to_string())),
                next_attempt_at: Some(Some(next_attempt_at)),
                ..ItemUpdate::transition(QueueStatus::Sending, QueueStatus::Pending)
            },
        )?;
        warn!(
            id = item.id,
            retry_count,
            next_retry_secs = delay.num_seconds(),
            error = message,
            "Send failed, backing off"
        );
        Ok(false)
    }

    /// Return a terminal `failed` item to `pending`. `retry_count` is kept.
    pub fn retry_failed(&self, id: u64) -> Result<QueueItem, QueueError> {
        let update = ItemUpdate {
            next_attempt_at: Some(None),
            ..ItemUpdate::transition(QueueStatus::Failed, QueueStatus::Pending)
        };
        match self.store.update(id, &update) {
            Ok(item) => {
                info!(id, retry_count = item.retry_count, "Failed item returned to pending");
                self.wake.notify_one();
                Ok(item)
            }
            Err(StoreError::NotFound(_) | StoreError::StatusConflict { .. }) => Err(QueueError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete `sent` items older than the retention window.
    pub fn purge_old(&self) -> Result<usize, QueueError> {
        let retention_days = self.config.get().retention_days;
        let cutoff = self.clock.now() - Duration::days(i64::from(retention_days));
        let deleted = self.store.delete_before(QueueStatus::Sent, cutoff)?;
        if deleted > 0 {
            info!(deleted, retention_days, "Purged old sent items");
        }
        Ok(deleted)
    }

    /// Aggregate counts. `sent_today` uses the tenant-local calendar day.
    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let tz = self.config.get().timezone();
        let today = self.clock.now().with_timezone(&tz).date_naive();

        let mut stats = QueueStats::default();
        for item in self.store.query(&QueueFilter::all())? {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Sending => stats.sending += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Sent => {
                    if item.sent_at.is_some_and(|at| at.with_timezone(&tz).date_naive() == today) {
                        stats.sent_today += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Connection snapshot including current queue counts.
    pub fn connection_state(&self) -> Result<ConnectionState, QueueError> {
        Ok(self.connection.snapshot(self.stats()?))
    }

    /// History of items created at or after `since`.
    pub fn health_since(&self, since: DateTime<Utc>) -> Result<QueueHealth, QueueError> {
        let mut health = QueueHealth::default();
        for item in self.store.query(&QueueFilter::all())? {
            if item.created_at < since {
                continue;
            }
            health.created += 1;
            health.failed_attempts += u64::from(item.retry_count);
            match item.status {
                QueueStatus::Sent => health.sent += 1,
                QueueStatus::Failed => health.failed += 1,
                QueueStatus::Pending | QueueStatus::Sending => {}
            }
        }
        Ok(health)
    }

    pub fn items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self.store.query(filter)?)
    }

    pub fn get(&self, id: u64) -> Result<Option<QueueItem>, QueueError> {
        Ok(self.store.get(id)?)
    }

    /// Return items stranded in `sending` by a crash to `pending`.
    ///
    /// Takes the send slot, so it never races a live drain pass. The
    /// interrupted attempt does not count against the retry budget.
    pub async fn recover_inflight(&self) -> Result<usize, QueueError> {
        let _slot = self.send_slot.lock().await;
        // Finished sends must land before anything still `sending` is reset
        self.resolve_outcomes()?;
        let mut recovered = 0;
        for item in self.store.query(&QueueFilter::status(QueueStatus::Sending))? {
            match self
                .store
                .update(item.id, &ItemUpdate::transition(QueueStatus::Sending, QueueStatus::Pending))
            {
                Ok(_) => recovered += 1,
                Err(StoreError::NotFound(_) | StoreError::StatusConflict { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if recovered > 0 {
            warn!(recovered, "Recovered items interrupted mid-send");
            self.wake.notify_one();
        }
        Ok(recovered)
    }

    /// Earliest future backoff deadline among pending items.
    pub fn next_wake_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        let now = self.clock.now();
        Ok(self
            .store
            .query(&QueueFilter::status(QueueStatus::Pending))?
            .into_iter()
            .filter_map(|item| item.next_attempt_at)
            .filter(|at| *at > now)
            .min())
    }

    /// Time left until the earliest backoff deadline.
    pub fn next_wake_in(&self) -> Result<Option<std::time::Duration>, QueueError> {
        let now = self.clock.now();
        Ok(self
            .next_wake_at()?
            .map(|at| (at - now).to_std().unwrap_or(std::time::Duration::ZERO)))
    }

    /// Wake the drain loop.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Resolves once new work may be available.
    pub async fn wait_for_work(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::config::SyncConfig;
    use crate::storage::InMemoryQueueStore;
    use crate::testing::ScriptedSender;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        queue: QueueManager,
        sender: Arc<ScriptedSender>,
        clock: Arc<MockClock>,
    }

    /// Store whose next `n` writes out of `sending` fail.
    struct FlakyStore {
        inner: InMemoryQueueStore,
        outcome_failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(outcome_failures: u32) -> Self {
            Self {
                inner: InMemoryQueueStore::new(),
                outcome_failures: AtomicU32::new(outcome_failures),
            }
        }
    }

    impl QueueStore for FlakyStore {
        fn allocate_id(&self) -> Result<u64, StoreError> {
            self.inner.allocate_id()
        }

        fn append(&self, item: &QueueItem) -> Result<(), StoreError> {
            self.inner.append(item)
        }

        fn get(&self, id: u64) -> Result<Option<QueueItem>, StoreError> {
            self.inner.get(id)
        }

        fn update(&self, id: u64, update: &ItemUpdate) -> Result<QueueItem, StoreError> {
            let fail = update.expect_status == Some(QueueStatus::Sending)
                && self
                    .outcome_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if fail {
                return Err(StoreError::Storage("disk full".into()));
            }
            self.inner.update(id, update)
        }

        fn query(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, StoreError> {
            self.inner.query(filter)
        }

        fn delete_before(&self, status: QueueStatus, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
            self.inner.delete_before(status, cutoff)
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(InMemoryQueueStore::new())).await
    }

    async fn harness_with(store: Arc<dyn QueueStore>) -> Harness {
        let sender = Arc::new(ScriptedSender::new());
        let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()));
        let connection = Arc::new(ConnectionTracker::new(sender.clone(), 3));
        connection.connect("https://reports.example.com", "site-1").await;
        let queue = QueueManager::new(
            store,
            sender.clone(),
            connection,
            SharedConfig::new(SyncConfig::default()),
            clock.clone(),
            RetryPolicy::default(),
        );
        Harness { queue, sender, clock }
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::seconds(4));
        assert_eq!(policy.backoff(3), Duration::seconds(16));
        assert_eq!(policy.backoff(10), Duration::seconds(300));
        assert_eq!(policy.backoff(200), Duration::seconds(300));
    }

    #[test]
    fn test_emergency_budget_is_larger() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.budget(PayloadType::Event), 5);
        assert_eq!(policy.budget(PayloadType::Emergency), 10);
    }

    #[tokio::test]
    async fn test_enqueue_then_drain_marks_sent() {
        let h = harness().await;
        let id = h.queue.enqueue(PayloadType::Summary, serde_json::json!({"n": 1})).unwrap();

        let report = h.queue.drain().await.unwrap();
        assert_eq!(report.sent, 1);

        let item = h.queue.get(id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Sent);
        assert_eq!(item.sent_at, Some(h.clock.now()));
        assert!(item.last_error.is_none());
        assert_eq!(item.tenant_id, "unassigned");
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_backoff() {
        let h = harness().await;
        let id = h.queue.enqueue(PayloadType::Event, serde_json::json!({})).unwrap();
        h.sender.push_send(Err(SendError::Transient("timeout".into())));

        let report = h.queue.drain().await.unwrap();
        assert_eq!(report.retry_scheduled, 1);

        let item = h.queue.get(id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("timeout"));
        assert_eq!(item.next_attempt_at, Some(h.clock.now() + Duration::seconds(4)));

        // Not eligible until the backoff passes
        assert_eq!(h.queue.drain().await.unwrap().attempts(), 0);
        assert_eq!(h.queue.next_wake_at().unwrap(), item.next_attempt_at);

        h.clock.advance(Duration::seconds(4));
        assert_eq!(h.queue.drain().await.unwrap().sent, 1);
        let item = h.queue.get(id).unwrap().unwrap();
        assert_eq!(item.retry_count, 1);
        assert!(item.last_error.is_none());
    }

    #[tokio::test]
    async fn test_terminal_error_fails_immediately() {
        let h = harness().await;
        let bad = h.queue.enqueue(PayloadType::Event, serde_json::json!({})).unwrap();
        let good = h.queue.enqueue(PayloadType::Event, serde_json::json!({})).unwrap();
        h.sender.push_send(Err(SendError::Terminal("422 malformed".into())));

        let report = h.queue.drain().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.sent, 1, "a rejection does not end the pass");

        let item = h.queue.get(bad).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.retry_count, 1);
        assert_eq!(h.queue.get(good).unwrap().unwrap().status, QueueStatus::Sent);
        assert_eq!(h.queue.stats().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_status_write_retried_after_store_error() {
        let h = harness_with(Arc::new(FlakyStore::new(1))).await;
        let id = h.queue.enqueue(PayloadType::Event, serde_json::json!({})).unwrap();

        assert_eq!(h.queue.drain().await.unwrap().sent, 1);
        assert_eq!(h.queue.get(id).unwrap().unwrap().status, QueueStatus::Sent);
        assert_eq!(h.queue.stats().unwrap().sending, 0);
    }

    #[tokio::test]
    async fn test_unwritten_outcome_resolved_by_next_drain() {
        let h = harness_with(Arc::new(FlakyStore::new(OUTCOME_WRITE_ATTEMPTS))).await;
        let id = h.queue.enqueue(PayloadType::Event, serde_json::json!({})).unwrap();

        assert!(matches!(h.queue.drain().await, Err(QueueError::Store(StoreError::Storage(_)))));
        assert_eq!(h.queue.get(id).unwrap().unwrap().status, QueueStatus::Sending);
        assert_eq!(h.queue.stats().unwrap().sending, 1);

        let report = h.queue.drain().await.unwrap();
        assert_eq!(report.attempts(), 0, "the delivered item is not sent again");
        let item = h.queue.get(id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Sent);
        assert!(item.sent_at.is_some());
        assert_eq!(h.queue.stats().unwrap().sending, 0);
        assert_eq!(h.sender.delivered(), vec![id]);
    }

    #[tokio::test]
    async fn test_retry_failed_requires_failed_state() {
        let h = harness().await;
        let id = h.queue.enqueue(PayloadType::Event, serde_json::json!({})).unwrap();
        assert!(matches!(h.queue.retry_failed(id), Err(QueueError::NotFound(_))));
        assert!(matches!(h.queue.retry_failed(999), Err(QueueError::NotFound(999))));

        h.sender.push_send(Err(SendError::Terminal("rejected".into())));
        h.queue.drain().await.unwrap();

        let item = h.queue.retry_failed(id).unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 1);
    }

    #[tokio::test]
    async fn test_drain_defers_when_disconnected() {
        let h = harness().await;
        h.queue.connection().disconnect();
        let id = h.queue.enqueue(PayloadType::Emergency, serde_json::json!({})).unwrap();

        let report = h.queue.drain().await.unwrap();
        assert!(report.deferred);
        assert_eq!(report.attempts(), 0);

        let item = h.queue.get(id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 0, "deferral does not consume retry budget");
    }

    #[tokio::test]
    async fn test_recover_inflight() {
        let h = harness().await;
        let id = h.queue.enqueue(PayloadType::Event, serde_json::json!({})).unwrap();
        h.queue
            .store
            .update(id, &ItemUpdate::transition(QueueStatus::Pending, QueueStatus::Sending))
            .unwrap();

        assert_eq!(h.queue.recover_inflight().await.unwrap(), 1);
        let item = h.queue.get(id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 0);
    }

    #[tokio::test]
    async fn test_sent_today_uses_tenant_day() {
        let h = harness().await;
        h.queue.enqueue(PayloadType::Summary, serde_json::json!({})).unwrap();
        h.queue.drain().await.unwrap();
        assert_eq!(h.queue.stats().unwrap().sent_today, 1);

        // Sent at 10:00 UTC; 14h later is the next UTC day
        h.clock.advance(Duration::hours(14));
        assert_eq!(h.queue.stats().unwrap().sent_today, 0);
    }

    #[tokio::test]
    async fn test_health_since_counts_attempts() {
        let h = harness().await;
        let start = h.clock.now();
        h.queue.enqueue(PayloadType::Event, serde_json::json!({})).unwrap();
        h.sender.push_send(Err(SendError::Transient("timeout".into())));
        h.queue.drain().await.unwrap();
        h.clock.advance(Duration::seconds(5));
        h.queue.drain().await.unwrap();

        let health = h.queue.health_since(start).unwrap();
        assert_eq!(health.created, 1);
        assert_eq!(health.sent, 1);
        assert_eq!(health.failed_attempts, 1);
        assert!((health.failure_rate() - 0.5).abs() < f64::EPSILON);
    }
}
