/// Durable FIFO log of mutations the remote has not confirmed yet.
///
/// The whole log is rewritten under `QUEUE_KEY` after every change, so a
/// restart resumes with exactly the items that were pending. Items are plain
/// data; the remote call is derived from `mutation` when the item is sent.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mutation::Mutation;
use crate::storage::{load_json, save_json, KeyValueStore, StorageError, QUEUE_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub mutation: Mutation,
    /// Version of the target entity before the mutation was applied locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_version: Option<u64>,
    /// Failed send attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueRecord {
    next_id: u64,
    items: VecDeque<QueueItem>,
}

pub struct OperationQueue {
    kv: Arc<dyn KeyValueStore>,
    state: Mutex<QueueRecord>,
}

impl OperationQueue {
    /// Open the queue persisted in `kv`, or an empty one.
    pub fn open(kv: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let mut record: QueueRecord = load_json(kv.as_ref(), QUEUE_KEY)?.unwrap_or_default();
        // Ids stay unique even if the record was edited by hand.
        let max_id = record.items.iter().map(|i| i.id).max().unwrap_or(0);
        record.next_id = record.next_id.max(max_id + 1);
        if !record.items.is_empty() {
            log::info!(
                "[lexera.queue] Restored {} pending operation(s)",
                record.items.len()
            );
        }
        Ok(Self {
            kv,
            state: Mutex::new(record),
        })
    }

    /// Append a mutation at the tail.
    pub fn enqueue(
        &self,
        mutation: Mutation,
        known_version: Option<u64>,
    ) -> Result<QueueItem, StorageError> {
        let mut state = self.lock();
        let item = QueueItem {
            id: state.next_id,
            timestamp: Utc::now(),
            mutation,
            known_version,
            attempts: 0,
        };
        state.next_id += 1;
        state.items.push_back(item.clone());
        self.persist(&state)?;
        log::debug!(
            "[lexera.queue] Enqueued #{} {} ({} pending)",
            item.id,
            item.mutation.kind(),
            state.items.len()
        );
        Ok(item)
    }

    /// Oldest item, left in place.
    pub fn peek(&self) -> Option<QueueItem> {
        self.lock().items.front().cloned()
    }

    /// Drop an item once it was confirmed or given up on.
    pub fn remove(&self, id: u64) -> Result<bool, StorageError> {
        let mut state = self.lock();
        let Some(pos) = state.items.iter().position(|i| i.id == id) else {
            return Ok(false);
        };
        state.items.remove(pos);
        self.persist(&state)?;
        Ok(true)
    }

    /// Count a failed attempt; returns the new attempt count.
    pub fn record_failure(&self, id: u64) -> Result<u32, StorageError> {
        let mut state = self.lock();
        let Some(item) = state.items.iter_mut().find(|i| i.id == id) else {
            return Ok(0);
        };
        item.attempts += 1;
        let attempts = item.attempts;
        self.persist(&state)?;
        Ok(attempts)
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.lock().items.iter().cloned().collect()
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.items.clear();
        self.persist(&state)
    }

    fn persist(&self, state: &QueueRecord) -> Result<(), StorageError> {
        save_json(self.kv.as_ref(), QUEUE_KEY, state).map_err(|e| {
            log::warn!("[lexera.queue] Failed to persist queue: {}", e);
            e
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueRecord> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
