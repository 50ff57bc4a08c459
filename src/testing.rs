//! Deterministic test doubles for the sync queue.
//!
//! [`ScriptedSender`] replaces the HTTP transport: send outcomes are queued
//! up front, probes can be failed on demand, and every call is recorded so
//! tests can assert on delivery order and concurrency.
//!
//! ## Example
//!
//! ```ignore
//! let sender = Arc::new(ScriptedSender::new());
//! sender.push_send(Err(SendError::Transient("timeout".into())));
//! // next send fails, every later one succeeds
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::sync::{SendError, Sender};
use crate::types::QueueItem;

/// Latency reported for scripted successes.
const SCRIPTED_LATENCY_MS: u64 = 5;

#[derive(Debug, Default)]
struct Script {
    sends: VecDeque<Result<u64, SendError>>,
    probe_error: Option<SendError>,
    delivered: Vec<u64>,
    attempted: Vec<u64>,
}

/// [`Sender`] whose outcomes are scripted by the test.
///
/// Sends succeed unless an outcome was queued with [`push_send`](Self::push_send).
#[derive(Debug, Default)]
pub struct ScriptedSender {
    script: Mutex<Script>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the outcome of the next unscripted send.
    pub fn push_send(&self, outcome: Result<u64, SendError>) {
        self.script().sends.push_back(outcome);
    }

    /// Queue `n` identical failures.
    pub fn fail_next(&self, n: usize, error: &SendError) {
        let mut script = self.script();
        for _ in 0..n {
            script.sends.push_back(Err(error.clone()));
        }
    }

    /// Make every probe fail with `error` until [`heal_probes`](Self::heal_probes).
    pub fn fail_probes(&self, error: SendError) {
        self.script().probe_error = Some(error);
    }

    pub fn heal_probes(&self) {
        self.script().probe_error = None;
    }

    /// Hold each send for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Ids successfully delivered, in delivery order.
    pub fn delivered(&self) -> Vec<u64> {
        self.script().delivered.clone()
    }

    /// Ids of every send attempt, in order.
    pub fn attempted(&self) -> Vec<u64> {
        self.script().attempted.clone()
    }

    /// Highest number of sends observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for ScriptedSender {
    async fn send(&self, _endpoint: &str, item: &QueueItem) -> Result<u64, SendError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = {
            let mut script = self.script();
            script.attempted.push(item.id);
            let outcome = script.sends.pop_front().unwrap_or(Ok(SCRIPTED_LATENCY_MS));
            if outcome.is_ok() {
                script.delivered.push(item.id);
            }
            outcome
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn probe(&self, _endpoint: &str) -> Result<u64, SendError> {
        match &self.script().probe_error {
            Some(error) => Err(error.clone()),
            None => Ok(SCRIPTED_LATENCY_MS),
        }
    }
}
