//! Bounded retry with fixed backoff.
//!
//! Network filesystems (NFS, AFS) produce transient artifacts: a lock file
//! that lingers after its holder unlinked it, a stat that fails right after a
//! create. These resolve within a few hundred milliseconds, so the policy
//! here is a small fixed number of attempts with a fixed sleep between them.
//! Callers decide what to do when the budget is exhausted; this type never
//! loops forever.

use std::thread;
use std::time::Duration;

/// An explicit bounded-retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Sleep between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Default policy for lock-file contention: 5 attempts, 0.5s apart.
    pub fn lock_default() -> Self {
        Self::new(5, Duration::from_millis(500))
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    ///
    /// Returns the first success, or the error from the final attempt.
    pub fn run<T, E>(&self, mut op: impl FnMut() -> std::result::Result<T, E>) -> std::result::Result<T, E> {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < attempts {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt was made"))
    }
}
