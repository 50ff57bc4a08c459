//! Attunement Engine - adapts the summary cadence to observed queue health
//!
//! Runs at most once per tuning period (daily, weekly or monthly). A link
//! that keeps failing gets fewer reports; a clean link gets more.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::queue::{QueueHealth, QueueManager};
use crate::clock::Clock;
use crate::config::{defaults, SharedConfig};

/// A change made to `report_interval_minutes`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TuningDecision {
    pub previous_minutes: u32,
    pub new_minutes: u32,
    pub failure_rate: f64,
    pub attempts: u64,
}

/// New summary interval for the observed health, or the current one when no
/// change is warranted.
///
/// Above 20% failed attempts the interval grows by `aggressiveness` percent.
/// Below 5% with no terminal failures it shrinks by half that. Any change is
/// clamped to `[5, 1440]` minutes, except that the clamp never moves an
/// out-of-range interval against the direction of the adjustment.
pub fn tuned_interval(current: u32, aggressiveness: u32, health: &QueueHealth) -> u32 {
    if health.attempts() == 0 {
        return current;
    }
    let rate = health.failure_rate();
    let step = f64::from(aggressiveness.min(100)) / 100.0;

    let slow_down = if rate > defaults::ATTUNEMENT_SLOWDOWN_FAILURE_RATE {
        true
    } else if rate < defaults::ATTUNEMENT_SPEEDUP_FAILURE_RATE && health.failed == 0 {
        false
    } else {
        return current;
    };
    let factor = if slow_down { 1.0 + step } else { 1.0 - step / 2.0 };

    let proposed = (f64::from(current) * factor).round();
    let clamped = proposed.clamp(
        f64::from(defaults::ATTUNEMENT_MIN_INTERVAL_MINUTES),
        f64::from(defaults::ATTUNEMENT_MAX_INTERVAL_MINUTES),
    );
    // Bounded by the clamp above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let minutes = clamped as u32;

    // An interval already outside the bounds is never pushed the wrong way
    if (slow_down && minutes < current) || (!slow_down && minutes > current) {
        return current;
    }
    minutes
}

pub struct AttunementEngine {
    queue: Arc<QueueManager>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    last_tuned_at: Mutex<DateTime<Utc>>,
}

impl AttunementEngine {
    pub fn new(queue: Arc<QueueManager>, config: SharedConfig, clock: Arc<dyn Clock>) -> Self {
        let last_tuned_at = Mutex::new(clock.now());
        Self {
            queue,
            config,
            clock,
            last_tuned_at,
        }
    }

    /// Run one tuning pass if enabled and due.
    pub fn tick(&self) -> Option<TuningDecision> {
        let config = self.config.get();
        let attunement = &config.attunement;
        if !attunement.auto_tuning_enabled {
            return None;
        }

        let now = self.clock.now();
        let mut last_tuned_at = self.last_tuned_at.lock().unwrap_or_else(PoisonError::into_inner);
        if now - *last_tuned_at < attunement.tuning_frequency.period() {
            return None;
        }

        let health = match self.queue.health_since(*last_tuned_at) {
            Ok(health) => health,
            Err(e) => {
                warn!(error = %e, "Attunement skipped, queue history unavailable");
                return None;
            }
        };
        *last_tuned_at = now;

        let previous = config.report_interval_minutes;
        let next = tuned_interval(previous, attunement.tuning_aggressiveness, &health);
        if next == previous {
            debug!(
                failure_rate = health.failure_rate(),
                attempts = health.attempts(),
                interval_minutes = previous,
                "Attunement: interval unchanged"
            );
            return None;
        }

        if let Err(e) = self.config.set_report_interval(next) {
            warn!(error = %e, "Attunement could not apply new interval");
            return None;
        }

        info!(
            previous_minutes = previous,
            new_minutes = next,
            failure_rate = health.failure_rate(),
            attempts = health.attempts(),
            "Attunement adjusted report interval"
        );
        Some(TuningDecision {
            previous_minutes: previous,
            new_minutes: next,
            failure_rate: health.failure_rate(),
            attempts: health.attempts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(sent: usize, failed_attempts: u64, failed: usize) -> QueueHealth {
        QueueHealth {
            created: sent + failed,
            sent,
            failed,
            failed_attempts,
        }
    }

    #[test]
    fn test_high_failure_rate_slows_down() {
        assert_eq!(tuned_interval(15, 50, &health(6, 4, 0)), 23);
        assert_eq!(tuned_interval(15, 100, &health(6, 4, 0)), 30);
    }

    #[test]
    fn test_clean_link_speeds_up() {
        assert_eq!(tuned_interval(20, 50, &health(100, 0, 0)), 15);
        // A terminal failure blocks speed-up even at a low rate
        assert_eq!(tuned_interval(20, 50, &health(100, 1, 1)), 20);
    }

    #[test]
    fn test_middle_band_and_no_data_unchanged() {
        assert_eq!(tuned_interval(15, 50, &health(90, 10, 0)), 15);
        assert_eq!(tuned_interval(15, 50, &QueueHealth::default()), 15);
        assert_eq!(tuned_interval(15, 0, &health(0, 10, 0)), 15);
    }

    #[test]
    fn test_clamped_to_bounds() {
        assert_eq!(tuned_interval(1_200, 100, &health(1, 9, 0)), 1_440);
        assert_eq!(tuned_interval(6, 100, &health(50, 0, 0)), 5);
    }

    #[test]
    fn test_speed_up_below_floor_keeps_interval() {
        // Intervals of 1..4 minutes are valid config; speeding up must not raise them to 5
        for current in 1..5 {
            assert_eq!(tuned_interval(current, 100, &health(50, 0, 0)), current);
        }
        // Slowing down from below the floor still lands inside the bounds
        assert_eq!(tuned_interval(2, 50, &health(1, 9, 0)), 5);
    }
}
