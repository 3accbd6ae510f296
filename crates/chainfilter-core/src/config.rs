//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for per-block fetches in [`BlockRangeFetcher`](crate::fetcher::BlockRangeFetcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Total attempts per block (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds.
    #[serde(default)]
    pub retry_interval_ms: u64,
    /// Upper bound for a single attempt in milliseconds.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_attempt_timeout_ms() -> u64 { 10_000 }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: 0,
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl FetchConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Top-level configuration for the filter engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Capacity of the broadcast channel carrying sync events.
    #[serde(default = "default_sync_channel_capacity")]
    pub sync_channel_capacity: usize,
    /// Head polling interval of [`PollingBlockTracker`](crate::tracker::PollingBlockTracker).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_sync_channel_capacity() -> usize { 64 }
fn default_poll_interval_ms() -> u64 { 4_000 }

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            sync_channel_capacity: default_sync_channel_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl FilterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
