//! Config struct definition and default implementation.

use super::types::*;
use crate::fs::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by all sessions attached to a repository.
///
/// This struct represents the contents of `<root>/config.yaml`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default registry name (default: "jobs").
    #[serde(default = "default_registry")]
    pub registry: String,

    /// Lowest job ID the counter may hand out. The counter file is
    /// bootstrapped with this value on first startup.
    #[serde(default)]
    pub minimum_count: u64,

    /// Seconds without a liveness refresh after which a session is presumed
    /// dead and its locks become reapable.
    #[serde(default = "default_session_expiry_secs")]
    pub session_expiry_secs: u64,

    /// Seconds between liveness-file refreshes by the background refresher.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Attempts when acquiring the fixed lock against a live holder.
    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,

    /// Backoff between fixed-lock attempts, in milliseconds.
    #[serde(default = "default_lock_retry_backoff_ms")]
    pub lock_retry_backoff_ms: u64,

    /// Whether a stale fixed lock (holder session dead) found at startup is
    /// reclaimed automatically. Default false: a stale fixed lock means a
    /// session died inside a critical section, and an operator should look
    /// before the repository is touched again.
    #[serde(default)]
    pub reclaim_stale_locks: bool,

    /// Seconds between disk-space checks by the coordinator poller.
    #[serde(default = "default_disk_check_interval_secs")]
    pub disk_check_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            minimum_count: 0,
            session_expiry_secs: default_session_expiry_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_backoff_ms: default_lock_retry_backoff_ms(),
            reclaim_stale_locks: false,
            disk_check_interval_secs: default_disk_check_interval_secs(),
        }
    }
}

impl Config {
    /// Retry policy for fixed-lock acquisition derived from config.
    pub fn lock_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lock_retry_attempts,
            Duration::from_millis(self.lock_retry_backoff_ms),
        )
    }

    /// The session staleness window as a Duration.
    pub fn session_expiry(&self) -> Duration {
        Duration::from_secs(self.session_expiry_secs)
    }
}
