//! API route handlers
//!
//! Thin projections of [`SyncService`](crate::sync::SyncService) operations:
//! - Health and combined status
//! - Queue listing, enqueue, retry, purge and manual drain
//! - Connect / disconnect
//! - Sync config read and validated update

mod config;
mod connection;
mod queue;
mod status;

pub use config::*;
pub use connection::*;
pub use queue::*;
pub use status::*;
