use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::constants::{
    CHUNK_SIZE, DEFAULT_COMPRESSION_LEVEL, MIN_CHUNK_SIZE, PAUSE_POLL_INTERVAL, PROGRESS_INTERVAL,
};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "p2p";
const APP_NAME: &str = "p2p_engine";
const CONFIG_FILE: &str = "config.json";
const CONFIG_DIR_ENV: &str = "P2P_ENGINE_CONFIG_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Where received files are materialized
    pub download_dir: PathBuf,
    /// Private staging area for compressed payloads
    pub scratch_dir: PathBuf,
    pub chunk_size: usize,
    pub compression_level: i32,
    pub progress_interval_ms: u64,
    pub pause_poll_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        // Fixed download path: ~/p2p_transfer (works on both Windows and Linux)
        let download_dir = directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("p2p_transfer");

        // Per-user cache dir; the engine creates it owner-only on first use
        let scratch_dir = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.cache_dir().join("scratch"))
            .unwrap_or_else(|| std::env::temp_dir().join("p2p_engine_scratch"));

        Self {
            download_dir,
            scratch_dir,
            chunk_size: CHUNK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            progress_interval_ms: PROGRESS_INTERVAL.as_millis() as u64,
            pause_poll_ms: PAUSE_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl TransferConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        let config = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        config.normalized()
    }

    /// Save config to disk
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no config directory")
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    /// Clamp values into ranges the engine can work with
    pub fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(MIN_CHUNK_SIZE);
        self.compression_level = self.compression_level.clamp(1, 19);
        self.progress_interval_ms = self.progress_interval_ms.max(1);
        self.pause_poll_ms = self.pause_poll_ms.max(1);
        self
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}
