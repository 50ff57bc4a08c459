//! Paraclate Sync: durable, retrying delivery of device reports
//!
//! Ships periodic summaries, scheduled grand summaries and emergency events
//! from a local device to one remote reporting endpoint.
//!
//! ## Architecture
//!
//! - **QueueStore**: durable item storage (sled, or in-memory for tests)
//! - **QueueManager**: delivery state machine, single-flight drain, backoff
//! - **ConnectionTracker**: link health to the remote endpoint
//! - **ReportScheduler**: when summaries and grand summaries are due
//! - **AttunementEngine**: adapts report cadence to observed queue health
//! - **API**: axum projection of [`sync::SyncService`] for the device UI

pub mod api;
pub mod clock;
pub mod config;
pub mod storage;
pub mod sync;
pub mod testing;
pub mod types;

// Re-export configuration
pub use config::{ParaclateConfig, SharedConfig, SyncConfig, SyncConfigUpdate};

// Re-export commonly used types
pub use types::{
    ConnectResult, ConnectionState, ConnectionStatus, PayloadType, QueueItem, QueueStats, QueueStatus,
};

// Re-export the service surface
pub use storage::{InMemoryQueueStore, QueueFilter, QueueStore, SledQueueStore, StoreError};
pub use sync::{DrainReport, HttpSender, QueueError, SendError, Sender, SyncService};
