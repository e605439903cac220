pub mod file;

use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use crate::error::StorageError;

/// Record holding the board document.
pub const BOARD_KEY: &str = "board";
/// Record holding the operation queue.
pub const QUEUE_KEY: &str = "queue";
/// Record holding the last remote-confirmed board.
pub const BASE_KEY: &str = "sync-base";

/// Abstract key-value persistence for local state.
/// Implementations: MemoryStore (tests, ephemeral sessions), FileStore (disk).
///
/// Every key is written independently, so a crash while one record is being
/// written never corrupts another.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// In-memory store. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.records.read() {
            Ok(records) => records.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        keys.sort();
        keys
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let records = match self.records.read() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(records.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut records = match self.records.write() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut records = match self.records.write() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Board;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get(BOARD_KEY).unwrap().is_none());

        store.set(BOARD_KEY, "{}").unwrap();
        store.set(QUEUE_KEY, "[]").unwrap();
        assert_eq!(store.get(BOARD_KEY).unwrap().as_deref(), Some("{}"));
        assert_eq!(store.keys(), vec!["board".to_string(), "queue".to_string()]);

        store.remove(BOARD_KEY).unwrap();
        assert!(store.get(BOARD_KEY).unwrap().is_none());
        assert!(store.get(QUEUE_KEY).unwrap().is_some());
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryStore::new();
        let board = Board::new("Persisted");
        save_json(&store, BOARD_KEY, &board).unwrap();
        let loaded: Board = load_json(&store, BOARD_KEY).unwrap().unwrap();
        assert_eq!(loaded, board);

        store.set(QUEUE_KEY, "not json").unwrap();
        let broken: Result<Option<Vec<u32>>, _> = load_json(&store, QUEUE_KEY);
        assert!(matches!(broken, Err(StorageError::Serialization(_))));
    }
}
