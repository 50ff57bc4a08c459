//! Live `SyncConfig` handle shared by the scheduler, queue and API.
//!
//! Readers take a cheap snapshot (`ArcSwap::load_full`); writers go through
//! [`SharedConfig::apply_update`] or [`SharedConfig::set_report_interval`],
//! which validate, persist (when file backed) and then swap.

use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use super::{ConfigError, ParaclateConfig, SyncConfig, SyncConfigUpdate};

/// Backing file plus the full document it belongs to.
struct Persistence {
    path: PathBuf,
    document: ParaclateConfig,
}

/// Injected owner of the process-wide [`SyncConfig`].
#[derive(Clone)]
pub struct SharedConfig {
    current: Arc<ArcSwap<SyncConfig>>,
    /// Serializes read-modify-write cycles and guards the backing document
    writer: Arc<Mutex<Option<Persistence>>>,
}

impl SharedConfig {
    /// In-memory only. Updates are not written anywhere.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// File backed. Accepted updates rewrite `path` with the whole document.
    pub fn with_file(document: ParaclateConfig, path: PathBuf) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(document.sync.clone())),
            writer: Arc::new(Mutex::new(Some(Persistence { path, document }))),
        }
    }

    /// Current configuration snapshot.
    pub fn get(&self) -> Arc<SyncConfig> {
        self.current.load_full()
    }

    /// Validate and apply a partial update.
    ///
    /// On any error the previous configuration stays in place.
    pub fn apply_update(&self, update: &SyncConfigUpdate) -> Result<Arc<SyncConfig>, ConfigError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let next = self.get().with_update(update)?;
        Self::commit(&self.current, &mut writer, next)
    }

    /// Rewrite `report_interval_minutes` (used by attunement).
    pub fn set_report_interval(&self, minutes: u32) -> Result<Arc<SyncConfig>, ConfigError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.get()).clone();
        next.report_interval_minutes = minutes;
        next.validate()?;
        Self::commit(&self.current, &mut writer, next)
    }

    fn commit(
        current: &ArcSwap<SyncConfig>,
        persistence: &mut Option<Persistence>,
        next: SyncConfig,
    ) -> Result<Arc<SyncConfig>, ConfigError> {
        if let Some(p) = persistence.as_mut() {
            let mut document = p.document.clone();
            document.sync = next.clone();
            if let Err(e) = document.save_to_file(&p.path) {
                warn!(path = %p.path.display(), error = %e, "Failed to persist sync config, keeping previous");
                return Err(e);
            }
            p.document = document;
            info!(path = %p.path.display(), "Sync config persisted");
        }

        let next = Arc::new(next);
        current.store(Arc::clone(&next));
        Ok(next)
    }
}

impl std::fmt::Debug for SharedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConfig").field("current", &self.get()).finish()
    }
}
