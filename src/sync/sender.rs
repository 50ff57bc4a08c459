//! Sender capability - how payloads reach the remote endpoint
//!
//! The queue core only depends on this trait. [`super::HttpSender`] is the
//! production transport; `testing::ScriptedSender` drives tests.

use async_trait::async_trait;

use crate::types::QueueItem;

/// Delivery failures, split by whether a retry can help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Network failure, timeout or server-side error. Retried with backoff.
    #[error("transient send failure: {0}")]
    Transient(String),
    /// The remote rejected the payload itself. Retrying the same bytes will
    /// not help; the item goes straight to `failed`.
    #[error("payload rejected: {0}")]
    Terminal(String),
}

impl SendError {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Terminal(m) => m,
        }
    }
}

/// Delivers payloads to one remote endpoint.
///
/// `send` is assumed NOT idempotent on the remote side; the queue guarantees
/// at most one outstanding call per endpoint.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Deliver one item. Returns the round-trip latency in milliseconds.
    async fn send(&self, endpoint: &str, item: &QueueItem) -> Result<u64, SendError>;

    /// Lightweight liveness check. Returns latency in milliseconds.
    async fn probe(&self, endpoint: &str) -> Result<u64, SendError>;
}
