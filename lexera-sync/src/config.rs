/// Settings for the offline sync engine.
/// Reads offline-sync.json from ~/.config/lexera/ (or platform equivalent).
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Base URL of the remote board service. No URL means local-only.
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Retries of a queued operation after its first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles on every further retry.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_sync_interval_secs() -> u64 {
    45
}

fn default_history_capacity() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            sync_interval_secs: default_sync_interval_secs(),
            history_capacity: default_history_capacity(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            data_dir: None,
        }
    }
}

impl SyncSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Delay before retry number `retry` (1-based): 1s, 2s, 4s with defaults.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1u64 << exp))
    }

    /// Directory for persisted records: the configured one, else the
    /// platform data dir.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

/// Default config path: ~/.config/lexera/offline-sync.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lexera")
        .join("offline-sync.json")
}

/// Default data dir: ~/.local/share/lexera/offline-sync
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lexera")
        .join("offline-sync")
}

/// Load settings from path. Returns defaults if the file doesn't exist or
/// can't be parsed.
pub fn load_config(path: &Path) -> SyncSettings {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("[lexera.config] Failed to parse config {}: {}", path.display(), e);
            SyncSettings::default()
        }),
        Err(_) => {
            log::info!("[lexera.config] No config at {}, using defaults", path.display());
            SyncSettings::default()
        }
    }
}
