//! Default value functions for the Config struct.

pub(crate) fn default_registry() -> String {
    "jobs".to_string()
}

/// Seconds without a liveness refresh after which a session is presumed dead.
///
/// Conservative on purpose: a too-short window reaps live sessions on loaded
/// machines or slow network filesystems, which is far worse than holding a
/// dead session's locks a little longer.
pub(crate) fn default_session_expiry_secs() -> u64 {
    60
}

/// Seconds between liveness refreshes. Must be well under the expiry window.
pub(crate) fn default_refresh_interval_secs() -> u64 {
    5
}

pub(crate) fn default_lock_retry_attempts() -> u32 {
    5
}

pub(crate) fn default_lock_retry_backoff_ms() -> u64 {
    500
}

pub(crate) fn default_disk_check_interval_secs() -> u64 {
    300
}
