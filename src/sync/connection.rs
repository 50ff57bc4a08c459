//! Connection Tracker - health of the link to the remote endpoint
//!
//! Holds the current [`ConnectionStatus`] plus last-sync / last-error facts.
//! The queue consults [`ConnectionTracker::is_usable`] before every send and
//! reports each outcome back through [`ConnectionTracker::record_outcome`].

use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::sender::Sender;
use crate::types::{ConnectResult, ConnectionState, ConnectionStatus, QueueStats};

#[derive(Debug, Default)]
struct LinkState {
    status: ConnectionStatus,
    endpoint: Option<String>,
    facility_id: Option<String>,
    /// Last endpoint/fid a connect was attempted with. Survives a failed
    /// first connect so the link can be re-probed; cleared by disconnect.
    reconnect_target: Option<(String, String)>,
    last_sync_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_latency_ms: Option<u64>,
    consecutive_failures: u32,
}

pub struct ConnectionTracker {
    sender: Arc<dyn Sender>,
    /// Consecutive send failures before flipping to `error`
    failure_threshold: u32,
    state: RwLock<LinkState>,
}

impl ConnectionTracker {
    pub fn new(sender: Arc<dyn Sender>, failure_threshold: u32) -> Self {
        Self {
            sender,
            failure_threshold: failure_threshold.max(1),
            state: RwLock::new(LinkState::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LinkState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LinkState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Probe `endpoint` and, on success, make it the active endpoint.
    ///
    /// Expected network failures are reported in the result, never as a panic
    /// or error. A failed first attempt leaves the endpoint unset; a failed
    /// reconnect keeps the previously known endpoint.
    pub async fn connect(&self, endpoint: &str, fid: &str) -> ConnectResult {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            let message = "endpoint must not be empty".to_string();
            let mut state = self.write();
            state.status = ConnectionStatus::Error;
            state.last_error = Some(message.clone());
            return ConnectResult {
                success: false,
                connected: false,
                message,
                latency_ms: None,
            };
        }

        {
            let mut state = self.write();
            state.status = ConnectionStatus::Connecting;
            state.reconnect_target = Some((endpoint.to_string(), fid.to_string()));
        }
        debug!(endpoint, "Probing remote endpoint");

        match self.sender.probe(endpoint).await {
            Ok(latency_ms) => {
                let mut state = self.write();
                state.status = ConnectionStatus::Connected;
                state.endpoint = Some(endpoint.to_string());
                state.facility_id = Some(fid.to_string());
                state.last_latency_ms = Some(latency_ms);
                state.consecutive_failures = 0;
                info!(endpoint, fid, latency_ms, "Connected to remote endpoint");
                ConnectResult {
                    success: true,
                    connected: true,
                    message: format!("Connected to {endpoint}"),
                    latency_ms: Some(latency_ms),
                }
            }
            Err(e) => {
                let mut state = self.write();
                state.status = ConnectionStatus::Error;
                state.last_error = Some(e.to_string());
                warn!(endpoint, error = %e, "Connection probe failed");
                ConnectResult {
                    success: false,
                    connected: false,
                    message: e.to_string(),
                    latency_ms: None,
                }
            }
        }
    }

    /// Re-probe after the link dropped to `error`.
    ///
    /// Uses the last attempted endpoint, so a daemon whose first connect
    /// failed keeps trying. Returns `true` when the link is usable
    /// afterwards. A no-op while disconnected or when nothing was ever
    /// attempted.
    pub async fn reprobe(&self) -> bool {
        let (status, target) = {
            let state = self.read();
            (state.status, state.reconnect_target.clone())
        };
        match (status, target) {
            (ConnectionStatus::Connected, _) => true,
            (ConnectionStatus::Error, Some((endpoint, fid))) => self.connect(&endpoint, &fid).await.connected,
            _ => false,
        }
    }

    /// Drop the link. Idempotent.
    pub fn disconnect(&self) {
        let mut state = self.write();
        if state.status != ConnectionStatus::Disconnected || state.endpoint.is_some() {
            info!(endpoint = ?state.endpoint, "Disconnected from remote endpoint");
        }
        state.status = ConnectionStatus::Disconnected;
        state.endpoint = None;
        state.reconnect_target = None;
        state.consecutive_failures = 0;
    }

    /// Whether sends may be attempted right now.
    pub fn is_usable(&self) -> bool {
        self.read().status == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.read().status
    }

    /// Active endpoint, if any.
    pub fn endpoint(&self) -> Option<String> {
        self.read().endpoint.clone()
    }

    /// Record the outcome of one send attempt.
    ///
    /// One success restores `connected`; `failure_threshold` consecutive
    /// failures flip the link to `error`.
    pub fn record_outcome(&self, success: bool, error: Option<&str>, at: DateTime<Utc>) {
        let mut state = self.write();
        if success {
            state.last_sync_at = Some(at);
            state.consecutive_failures = 0;
            if state.status == ConnectionStatus::Error {
                info!("Send succeeded, connection restored");
                state.status = ConnectionStatus::Connected;
            }
        } else {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_error = Some(error.unwrap_or("send failed").to_string());
            if state.consecutive_failures >= self.failure_threshold
                && state.status == ConnectionStatus::Connected
            {
                warn!(
                    consecutive_failures = state.consecutive_failures,
                    "Too many consecutive send failures, marking connection as error"
                );
                state.status = ConnectionStatus::Error;
            }
        }
    }

    /// Record latency of a successful send.
    pub fn record_latency(&self, latency_ms: u64) {
        self.write().last_latency_ms = Some(latency_ms);
    }

    /// Connection snapshot combined with the given queue counts.
    pub fn snapshot(&self, queue_stats: QueueStats) -> ConnectionState {
        let state = self.read();
        ConnectionState {
            connected: state.status == ConnectionStatus::Connected,
            connection_status: state.status,
            endpoint: state.endpoint.clone(),
            facility_id: state.facility_id.clone(),
            last_sync_at: state.last_sync_at,
            last_error: state.last_error.clone(),
            last_latency_ms: state.last_latency_ms,
            consecutive_failures: state.consecutive_failures,
            queue_stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SendError;
    use crate::testing::ScriptedSender;

    fn tracker(sender: Arc<ScriptedSender>) -> ConnectionTracker {
        ConnectionTracker::new(sender, 3)
    }

    #[tokio::test]
    async fn test_connect_success() {
        let sender = Arc::new(ScriptedSender::new());
        let tracker = tracker(sender);

        let result = tracker.connect("https://reports.example.com", "site-1").await;
        assert!(result.success && result.connected);
        assert!(result.latency_ms.is_some());
        assert!(tracker.is_usable());
        assert_eq!(tracker.endpoint().as_deref(), Some("https://reports.example.com"));
    }

    #[tokio::test]
    async fn test_first_connect_failure_leaves_endpoint_unset() {
        let sender = Arc::new(ScriptedSender::new());
        sender.fail_probes(SendError::Transient("connection refused".into()));
        let tracker = tracker(sender);

        let result = tracker.connect("https://reports.example.com", "site-1").await;
        assert!(!result.success);
        assert_eq!(result.message, "transient send failure: connection refused");
        assert_eq!(tracker.status(), ConnectionStatus::Error);
        assert!(tracker.endpoint().is_none());
        assert!(!tracker.is_usable());
    }

    #[tokio::test]
    async fn test_empty_endpoint_reported_not_thrown() {
        let tracker = tracker(Arc::new(ScriptedSender::new()));
        let result = tracker.connect("  ", "site-1").await;
        assert!(!result.success);
        assert!(tracker.endpoint().is_none());
    }

    #[tokio::test]
    async fn test_consecutive_failures_flip_to_error_and_back() {
        let tracker = tracker(Arc::new(ScriptedSender::new()));
        tracker.connect("https://reports.example.com", "site-1").await;

        let now = Utc::now();
        tracker.record_outcome(false, Some("timeout"), now);
        tracker.record_outcome(false, Some("timeout"), now);
        assert!(tracker.is_usable());
        tracker.record_outcome(false, Some("timeout"), now);
        assert_eq!(tracker.status(), ConnectionStatus::Error);

        tracker.record_outcome(true, None, now);
        assert_eq!(tracker.status(), ConnectionStatus::Connected);
        let snap = tracker.snapshot(QueueStats::default());
        assert_eq!(snap.last_sync_at, Some(now));
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let tracker = tracker(Arc::new(ScriptedSender::new()));
        tracker.connect("https://reports.example.com", "site-1").await;

        tracker.disconnect();
        tracker.disconnect();
        assert_eq!(tracker.status(), ConnectionStatus::Disconnected);
        assert!(tracker.endpoint().is_none());
        assert!(!tracker.reprobe().await);
    }

    #[tokio::test]
    async fn test_reprobe_after_failed_first_connect() {
        let sender = Arc::new(ScriptedSender::new());
        sender.fail_probes(SendError::Transient("network unreachable".into()));
        let tracker = tracker(sender.clone());

        assert!(!tracker.connect("https://reports.example.com", "site-1").await.connected);
        assert!(!tracker.reprobe().await);
        assert!(tracker.endpoint().is_none());

        sender.heal_probes();
        assert!(tracker.reprobe().await);
        assert!(tracker.is_usable());
        assert_eq!(tracker.endpoint().as_deref(), Some("https://reports.example.com"));
        let snap = tracker.snapshot(QueueStats::default());
        assert_eq!(snap.facility_id.as_deref(), Some("site-1"));
    }

    #[tokio::test]
    async fn test_reprobe_recovers_from_error() {
        let tracker = tracker(Arc::new(ScriptedSender::new()));
        tracker.connect("https://reports.example.com", "site-1").await;
        for _ in 0..3 {
            tracker.record_outcome(false, Some("503"), Utc::now());
        }
        assert!(!tracker.is_usable());

        assert!(tracker.reprobe().await);
        assert!(tracker.is_usable());
    }
}
