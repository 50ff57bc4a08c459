//! Paraclate sync - durable, retrying delivery to the remote endpoint
//!
//! ```text
//! ReportScheduler ──┐
//! API / callers ────┼──► QueueManager ──► Sender ──► remote endpoint
//! AttunementEngine  │         │
//!  (tunes cadence) ─┘         └── ConnectionTracker (link health)
//! ```
//!
//! [`SyncService`] wires these together; [`tasks`] runs the drain and timer
//! loops.

mod attunement;
mod connection;
mod http_sender;
mod payload;
mod queue;
mod scheduler;
mod sender;
mod service;
pub mod tasks;

pub use attunement::{tuned_interval, AttunementEngine, TuningDecision};
pub use connection::ConnectionTracker;
pub use http_sender::{classify_status, HttpSender};
pub use payload::{DefaultPayloadBuilder, PayloadBuilder, PayloadError, ReportRequest};
pub use queue::{DrainReport, QueueError, QueueHealth, QueueManager, RetryPolicy};
pub use scheduler::{ReportScheduler, TickReport};
pub use sender::{SendError, Sender};
pub use service::{SyncService, SyncServiceBuilder};
