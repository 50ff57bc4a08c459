//! Sync Service - the one handle the daemon and the HTTP API hold
//!
//! Wires the queue, connection tracker, scheduler and attunement engine
//! around one store, one sender and one clock, and exposes the operations
//! callers are allowed to perform.

use std::sync::Arc;
use tracing::{info, warn};

use super::attunement::AttunementEngine;
use super::connection::ConnectionTracker;
use super::payload::{DefaultPayloadBuilder, PayloadBuilder};
use super::queue::{DrainReport, QueueError, QueueManager, RetryPolicy};
use super::scheduler::ReportScheduler;
use super::sender::Sender;
use crate::clock::{Clock, SystemClock};
use crate::config::{defaults, ConfigError, QueueConfig, SharedConfig, SyncConfig, SyncConfigUpdate};
use crate::storage::{QueueFilter, QueueStore};
use crate::types::{ConnectResult, ConnectionState, PayloadType, QueueItem, QueueStats};

/// Assembles a [`SyncService`]. Clock, payload builder and tuning knobs
/// default to production values.
pub struct SyncServiceBuilder {
    config: SharedConfig,
    store: Arc<dyn QueueStore>,
    sender: Arc<dyn Sender>,
    clock: Arc<dyn Clock>,
    payload_builder: Arc<dyn PayloadBuilder>,
    queue_config: QueueConfig,
    failure_threshold: u32,
}

impl SyncServiceBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn payload_builder(mut self, builder: Arc<dyn PayloadBuilder>) -> Self {
        self.payload_builder = builder;
        self
    }

    pub fn queue_config(mut self, queue_config: QueueConfig) -> Self {
        self.queue_config = queue_config;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn build(self) -> SyncService {
        let connection = Arc::new(ConnectionTracker::new(self.sender.clone(), self.failure_threshold));
        let queue = Arc::new(QueueManager::new(
            self.store,
            self.sender,
            connection.clone(),
            self.config.clone(),
            self.clock.clone(),
            RetryPolicy::from(&self.queue_config),
        ));
        let scheduler = Arc::new(ReportScheduler::new(
            queue.clone(),
            self.config.clone(),
            self.clock.clone(),
            self.payload_builder,
        ));
        let attunement = Arc::new(AttunementEngine::new(queue.clone(), self.config.clone(), self.clock));

        SyncService {
            queue,
            connection,
            scheduler,
            attunement,
            config: self.config,
            queue_config: Arc::new(self.queue_config),
        }
    }
}

/// Cloneable facade over the sync subsystem.
#[derive(Clone)]
pub struct SyncService {
    queue: Arc<QueueManager>,
    connection: Arc<ConnectionTracker>,
    scheduler: Arc<ReportScheduler>,
    attunement: Arc<AttunementEngine>,
    config: SharedConfig,
    queue_config: Arc<QueueConfig>,
}

impl SyncService {
    pub fn builder(config: SharedConfig, store: Arc<dyn QueueStore>, sender: Arc<dyn Sender>) -> SyncServiceBuilder {
        SyncServiceBuilder {
            config,
            store,
            sender,
            clock: Arc::new(SystemClock),
            payload_builder: Arc::new(DefaultPayloadBuilder),
            queue_config: QueueConfig::default(),
            failure_threshold: defaults::CONNECTION_FAILURE_THRESHOLD,
        }
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<ReportScheduler> {
        &self.scheduler
    }

    pub fn attunement(&self) -> &Arc<AttunementEngine> {
        &self.attunement
    }

    pub fn queue_config(&self) -> &QueueConfig {
        &self.queue_config
    }

    pub fn enqueue(&self, payload_type: PayloadType, payload: serde_json::Value) -> Result<u64, QueueError> {
        self.queue.enqueue(payload_type, payload)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        self.queue.stats()
    }

    pub fn connection_state(&self) -> Result<ConnectionState, QueueError> {
        self.queue.connection_state()
    }

    /// Connect to `endpoint`, falling back to the configured endpoint and fid.
    ///
    /// A successful connect wakes the drain loop and records the endpoint in
    /// the sync config so the daemon reconnects to it after a restart.
    pub async fn connect(&self, endpoint: Option<&str>, fid: Option<&str>) -> ConnectResult {
        let config = self.config.get();
        let endpoint = endpoint.map(str::to_string).or_else(|| config.endpoint.clone()).unwrap_or_default();
        let fid = fid.map_or_else(|| config.fid.clone(), str::to_string);

        let result = self.connection.connect(&endpoint, &fid).await;
        if !result.connected {
            return result;
        }

        self.queue.wake();
        let endpoint = endpoint.trim();
        if config.endpoint.as_deref() != Some(endpoint) || config.fid != fid {
            let update = SyncConfigUpdate {
                endpoint: Some(endpoint.to_string()),
                fid: Some(fid),
                ..SyncConfigUpdate::default()
            };
            if let Err(e) = self.config.apply_update(&update) {
                warn!(error = %e, "Connected, but endpoint could not be saved to config");
            }
        }
        result
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn retry_failed(&self, id: u64) -> Result<QueueItem, QueueError> {
        self.queue.retry_failed(id)
    }

    pub fn purge_old(&self) -> Result<usize, QueueError> {
        self.queue.purge_old()
    }

    pub fn items(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, QueueError> {
        self.queue.items(filter)
    }

    pub fn get(&self, id: u64) -> Result<Option<QueueItem>, QueueError> {
        self.queue.get(id)
    }

    /// Run one drain pass now instead of waiting for the drain loop.
    pub async fn drain(&self) -> Result<DrainReport, QueueError> {
        self.queue.drain().await
    }

    pub async fn recover_inflight(&self) -> Result<usize, QueueError> {
        self.queue.recover_inflight().await
    }

    pub fn config(&self) -> Arc<SyncConfig> {
        self.config.get()
    }

    /// Validate and apply a partial config update.
    ///
    /// Rejected updates leave the previous configuration in place.
    pub fn update_config(&self, update: &SyncConfigUpdate) -> Result<Arc<SyncConfig>, ConfigError> {
        let updated = self.config.apply_update(update)?;
        info!(
            tid = %updated.tid,
            fid = %updated.fid,
            report_interval_minutes = updated.report_interval_minutes,
            "Sync config updated"
        );
        Ok(updated)
    }
}
