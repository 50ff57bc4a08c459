//! In-memory queue store
//!
//! Thread-safe via `RwLock`. Not durable, data is lost on restart.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use super::{reference_time, ItemUpdate, QueueFilter, QueueStore, StoreError};
use crate::types::{QueueItem, QueueStatus};

pub struct InMemoryQueueStore {
    items: RwLock<BTreeMap<u64, QueueItem>>,
    next_id: AtomicU64,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Storage(e.to_string())
}

impl QueueStore for InMemoryQueueStore {
    fn allocate_id(&self) -> Result<u64, StoreError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn append(&self, item: &QueueItem) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(poisoned)?;
        if items.contains_key(&item.id) {
            return Err(StoreError::Duplicate { id: item.id });
        }
        items.insert(item.id, item.clone());
        Ok(())
    }

    fn get(&self, id: u64) -> Result<Option<QueueItem>, StoreError> {
        let items = self.items.read().map_err(poisoned)?;
        Ok(items.get(&id).cloned())
    }

    fn update(&self, id: u64, update: &ItemUpdate) -> Result<QueueItem, StoreError> {
        let mut items = self.items.write().map_err(poisoned)?;
        let item = items.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        // Apply to a copy so a rejected guard leaves the stored item untouched
        let mut next = item.clone();
        update.apply_to(&mut next)?;
        *item = next.clone();
        Ok(next)
    }

    fn query(&self, filter: &QueueFilter) -> Result<Vec<QueueItem>, StoreError> {
        let items = self.items.read().map_err(poisoned)?;
        let matching = items.values().filter(|item| filter.matches(item)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    fn delete_before(&self, status: QueueStatus, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut items = self.items.write().map_err(poisoned)?;
        let before = items.len();
        items.retain(|_, item| !(item.status == status && reference_time(item) < cutoff));
        Ok(before - items.len())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
