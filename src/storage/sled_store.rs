//! Sled-backed queue store
//!
//! Items live in the `queue_items` tree keyed by big-endian id, so iteration
//! order is creation order. Every write is flushed before returning; a queue
//! mutation that returned `Ok` survives a crash.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{reference_time, ItemUpdate, QueueFilter, QueueStore, StoreError};
use crate::types::{QueueItem, QueueStatus};

const ITEMS_TREE: &str = "queue_items";

#[derive(Clone)]
pub struct SledQueueStore {
    db: Arc<sled::Db>,
    items: sled::Tree,
}

fn storage_err(e: sled::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

impl SledQueueStore {
    /// Open or create the queue database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(storage_err)?;
        let items = db.open_tree(ITEMS_TREE).map_err(storage_err)?;

        info!(path = %path.display(), items = items.len(), "Queue store opened");

        Ok(Self {
            db: Arc::new(db),
            items,
        })
    }

    fn key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn encode(item: &QueueItem) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(item).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(raw: &[u8]) -> Result<QueueItem, StoreError> {
        serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.items.flush().map(|_| ()).map_err(storage_err)
    }

    /// Decode every item, dropping entries that no longer parse.
    fn scan(&self) -> Result<Vec<QueueItem>, StoreError> {
        let mut out = Vec::new();
        let mut corrupted = Vec::new();

        for entry in self.items.iter() {
            let (key, value) = entry.map_err(storage_err)?;
            match Self::decode(&value) {
                Ok(item) => out.push(item),
                Err(e) => {
                    error!(error = %e, "Corrupted queue entry, removing");
                    corrupted.push(key);
                }
            }
        }

        if !corrupted.is_empty() {
            for key in corrupted {
                self.items.remove(key).map_err(storage_err)?;
            }
            self.flush()?;
        }

        Ok(out)
    }
}

impl QueueStore for SledQueueStore {
    fn allocate_id(&self) -> Result<u64, StoreError> {
        // sled ids start at 0; queue ids start at 1
        self.db.generate_id().map(|id| id + 1).map_err(storage_err)
    }

    fn append(&self, item: &QueueItem) -> Result<(), StoreError> {
        let value = Self::encode(item)?;
        let swapped = self
            .items
            .compare_and_swap(Self::key(item.id), None as Option<&[u8]>, Some(value))
            .map_err(storage_err)?;
        if swapped.is_err() {
            return Err(StoreError::Duplicate { id: item.id });
        }
        self.flush()?;
        debug!(id = item.id, payload_type = %item.payload_type, "Queue item appended");
        Ok(())
    }

    fn get(&self, id: u64) -> Result<Option<QueueItem>, StoreError> {
        self.items
            .get(Self::key(id))
            .map_err(storage_err)?
            .map(|raw| Self::decode(&raw))
            .transpose()
    }

    fn update(&self, id: u64, update: &ItemUpdate) -> Result<QueueItem, StoreError> {
        let key = Self::key(id);
        loop {
            let raw = self
                .items
                .get(key)
                .map_err(storage_err)?
                .ok_or(StoreError::NotFound(id))?;
            let mut item = Self::decode(&raw)?;
            update.apply_to(&mut item)?;
            let value = Self::encode(&item)?;

            match self
                .items
                .compare_and_swap(key, Some(raw), Some(value))
                .map_err(storage_err)?
            {
                Ok(()) => {
                    self.flush()?;
                    return Ok(item);
                }
                // Lost a race with another writer: re-read and re-check the guard
                Err(_) => continue,
            }
        }
    }

    fn query(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, StoreError> {
        let matching = self.scan()?.into_iter().filter(|item| filter.matches(item));
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    fn delete_before(&self, status: QueueStatus, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut deleted = 0;
        for item in self.scan()? {
            if item.status != status || reference_time(&item) >= cutoff {
                continue;
            }
            let key = Self::key(item.id);
            let Some(raw) = self.items.get(key).map_err(storage_err)? else {
                continue;
            };
            // Only delete if the item is still in `status`
            if Self::decode(&raw).map(|current| current.status == status).unwrap_or(false)
                && self
                    .items
                    .compare_and_swap(key, Some(raw), None as Option<&[u8]>)
                    .map_err(storage_err)?
                    .is_ok()
            {
                deleted += 1;
            }
        }

        if deleted > 0 {
            self.flush()?;
        }
        Ok(deleted)
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}
