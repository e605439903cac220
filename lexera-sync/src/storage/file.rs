/// Local filesystem key-value store.
///
/// One file per key (`<dir>/<key>.json`) with:
/// - Atomic writes (write to .tmp, fsync, rename, fsync directory)
/// - Refusal to replace a non-empty record with empty content
/// - SHA-256 fingerprints of the last write per key, so unchanged records
///   are not rewritten on every store notification
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use super::{KeyValueStore, StorageError};

pub struct FileStore {
    dir: PathBuf,
    /// key -> fingerprint of the content last written or read
    fingerprints: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            fingerprints: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a key. Anything outside `[A-Za-z0-9_-]` is replaced so a
    /// key can never escape the store directory.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    fn fingerprint(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn remember(&self, key: &str, fingerprint: Option<String>) {
        let mut fingerprints = match self.fingerprints.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match fingerprint {
            Some(fp) => {
                fingerprints.insert(key.to_string(), fp);
            }
            None => {
                fingerprints.remove(key);
            }
        }
    }

    fn is_unchanged(&self, key: &str, fingerprint: &str) -> bool {
        let fingerprints = match self.fingerprints.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        fingerprints.get(key).map_or(false, |fp| fp == fingerprint)
    }

    /// Atomic write with fsync: write to .tmp, fsync, rename, fsync directory.
    /// Refuses to write empty content over a non-empty file (data safety).
    fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
        if content.trim().is_empty() {
            if let Ok(existing) = fs::read_to_string(path) {
                if !existing.trim().is_empty() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "Refusing to overwrite non-empty record with empty content",
                    ));
                }
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        if let Some(dir) = path.parent() {
            if let Ok(d) = fs::File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => {
                self.remember(key, Some(Self::fingerprint(&content)));
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let fingerprint = Self::fingerprint(value);
        if self.is_unchanged(key, &fingerprint) {
            return Ok(());
        }
        Self::atomic_write(&self.path_for(key), value)?;
        self.remember(key, Some(fingerprint));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.remember(key, None);
        Ok(())
    }
}
