//! Bootstrap configuration. The account itself comes from the credentials
//! file (see [`crate::credentials`]) — this only carries the ambient knobs
//! a production bootstrap needs beyond a bare `jid password` line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the `jid password` credentials file.
    pub credentials_file: PathBuf,
    /// Path to the YAML state snapshot.
    pub state_file: PathBuf,
    /// Minimum gap between consecutive state saves, in seconds.
    pub save_interval_secs: u64,
    /// Outbound batcher pacing window, in seconds.
    pub batch_interval_secs: u64,
    /// Mirrors `OutboundBatcher`'s `useSeparateMessages` toggle.
    pub use_separate_messages: bool,
    /// How long to wait for the initial connection before giving up, in
    /// seconds.
    pub connect_timeout_secs: u64,
    /// How many connect attempts `connect_with_retry` makes before giving
    /// up and exiting.
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_file: PathBuf::from("credentials.txt"),
            state_file: PathBuf::from("state.yaml"),
            save_interval_secs: 60,
            batch_interval_secs: 2,
            use_separate_messages: false,
            connect_timeout_secs: 30,
            max_reconnect_attempts: 5,
        }
    }
}

impl Config {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs(self.batch_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Reads and parses a config file. Missing file is not an error here —
    /// unlike the credentials file, every field has a usable default.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}
