//! Paraclate Configuration Module
//!
//! Loads `paraclate.toml` and owns the live [`SyncConfig`].
//!
//! ## Loading Order
//!
//! 1. `--config` command-line flag (hard error if unreadable)
//! 2. `PARACLATE_CONFIG` environment variable
//! 3. `paraclate.toml` in the current working directory
//! 4. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! let loaded = ParaclateConfig::load();
//! let shared = match loaded.source {
//!     Some(path) => SharedConfig::with_file(loaded.config, path),
//!     None => SharedConfig::new(loaded.config.sync),
//! };
//! let interval = shared.get().report_interval_minutes;
//! ```

mod shared;
mod sync_config;
pub mod defaults;

pub use shared::SharedConfig;
pub use sync_config::*;
