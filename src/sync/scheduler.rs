//! Report Scheduler - decides when summary and grand summary reports are due
//!
//! Driven once a minute by the timer loop. Each tick:
//!
//! 1. every grand summary slot whose tenant-local time has passed and that
//!    has not fired on the current tenant-local date produces a
//!    `grand_summary`
//! 2. a `summary` is produced once `report_interval_minutes` have elapsed
//!    since the previous one
//!
//! Both can fire in the same tick. Failures are logged and retried on the
//! next tick; nothing propagates to the caller.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info};

use super::payload::{PayloadBuilder, ReportRequest};
use super::queue::{QueueError, QueueManager};
use crate::clock::Clock;
use crate::config::{SharedConfig, SlotTime};
use crate::storage::QueueFilter;
use crate::types::PayloadType;

#[derive(Debug)]
struct SchedulerState {
    last_summary_fired_at: DateTime<Utc>,
    /// Tenant-local date each slot last fired on
    grand_fired_on: HashMap<SlotTime, NaiveDate>,
    /// `grand_fired_on` has been loaded from the queue store
    seeded: bool,
}

/// Ids enqueued by one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub grand_summaries: Vec<u64>,
    pub summary: Option<u64>,
    /// Reports that were due but could not be built or enqueued
    pub errors: usize,
}

pub struct ReportScheduler {
    queue: Arc<QueueManager>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    builder: Arc<dyn PayloadBuilder>,
    state: Mutex<SchedulerState>,
}

impl ReportScheduler {
    pub fn new(
        queue: Arc<QueueManager>,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
        builder: Arc<dyn PayloadBuilder>,
    ) -> Self {
        let state = SchedulerState {
            last_summary_fired_at: clock.now(),
            grand_fired_on: HashMap::new(),
            seeded: false,
        };
        Self {
            queue,
            config,
            clock,
            builder,
            state: Mutex::new(state),
        }
    }

    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let config = self.config.get();
        let tz = config.timezone();
        let local = now.with_timezone(&tz);
        let today = local.date_naive();

        let mut report = TickReport::default();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if !state.seeded {
            match self.seed_fired_slots(&mut state, tz) {
                Ok(()) => state.seeded = true,
                Err(e) => {
                    // Without history a slot could fire twice today; hold off
                    error!(error = %e, "Failed to load grand summary history, skipping slots this tick");
                    report.errors += 1;
                }
            }
        }

        let seeded = state.seeded;
        for slot in config.grand_summary_times.iter().filter(|_| seeded) {
            if local.time() < slot.time() || state.grand_fired_on.get(slot) == Some(&today) {
                continue;
            }
            let window_start = now - Duration::hours(24);
            match self.produce(PayloadType::GrandSummary, window_start, now, Some(*slot)) {
                Some(id) => {
                    info!(id, %slot, date = %today, "Grand summary enqueued");
                    state.grand_fired_on.insert(*slot, today);
                    report.grand_summaries.push(id);
                }
                None => report.errors += 1,
            }
        }

        let interval = Duration::minutes(i64::from(config.report_interval_minutes));
        if now - state.last_summary_fired_at >= interval {
            match self.produce(PayloadType::Summary, state.last_summary_fired_at, now, None) {
                Some(id) => {
                    debug!(id, interval_minutes = config.report_interval_minutes, "Summary enqueued");
                    state.last_summary_fired_at = now;
                    report.summary = Some(id);
                }
                None => report.errors += 1,
            }
        }

        report
    }

    /// Load the date each slot last fired on from grand summaries already in
    /// the queue, so a restart never fires a slot twice on one day.
    fn seed_fired_slots(&self, state: &mut SchedulerState, tz: FixedOffset) -> Result<(), QueueError> {
        let filter = QueueFilter {
            payload_type: Some(PayloadType::GrandSummary),
            ..QueueFilter::default()
        };
        for item in self.queue.items(&filter)? {
            let Some(slot) = item.slot else { continue };
            let date = item.created_at.with_timezone(&tz).date_naive();
            let fired_on = state.grand_fired_on.entry(slot).or_insert(date);
            *fired_on = (*fired_on).max(date);
        }
        if !state.grand_fired_on.is_empty() {
            debug!(slots = state.grand_fired_on.len(), "Loaded grand summary history");
        }
        Ok(())
    }

    /// Build and enqueue one report. Failures are logged and yield `None`.
    fn produce(
        &self,
        kind: PayloadType,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        slot: Option<SlotTime>,
    ) -> Option<u64> {
        let config = self.config.get();
        let queue_stats = match self.queue.stats() {
            Ok(stats) => stats,
            Err(e) => {
                error!(%kind, error = %e, "Failed to read queue stats for report");
                return None;
            }
        };

        let request = ReportRequest {
            kind,
            tenant_id: config.tid.clone(),
            facility_id: config.fid.clone(),
            window_start,
            window_end,
            slot,
            queue_stats,
            connection_status: self.queue.connection().status(),
        };

        let payload = match self.builder.build(&request) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%kind, error = %e, "Report payload build failed");
                return None;
            }
        };

        match self.queue.enqueue_for_slot(kind, payload, slot) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(%kind, error = %e, "Failed to enqueue report");
                None
            }
        }
    }
}
