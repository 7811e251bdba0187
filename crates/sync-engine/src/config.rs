//! Engine configuration

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Minimum interval between processed updates for one record, in ms
    #[serde(default = "default_debounce_interval_ms")]
    pub debounce_interval_ms: u64,

    /// Polling cycle interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Whether non-retryable channel failures fall back to polling
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// Claims created before this Unix timestamp start in polling mode
    #[serde(default)]
    pub legacy_cutoff_ts: Option<i64>,

    /// Grace delay before tearing down a subscription whose record
    /// reached a terminal status, in ms
    #[serde(default = "default_terminal_grace_ms")]
    pub terminal_grace_ms: u64,
}

fn default_debounce_interval_ms() -> u64 {
    100
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_fallback_enabled() -> bool {
    true
}

fn default_terminal_grace_ms() -> u64 {
    2_000
}


impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_interval_ms: default_debounce_interval_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            fallback_enabled: default_fallback_enabled(),
            legacy_cutoff_ts: None,
            terminal_grace_ms: default_terminal_grace_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from SYNC_-prefixed environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SYNC"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn terminal_grace(&self) -> Duration {
        Duration::from_millis(self.terminal_grace_ms)
    }
}
