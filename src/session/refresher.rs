//! Background thread keeping this session's liveness file fresh.

use super::{reap_dead_sessions, touch_session_file};
use crate::config::Config;
use crate::context::RepositoryContext;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Granularity of the stop-flag poll while waiting out a refresh interval.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to the refresher thread.
///
/// The thread touches this session's liveness file every refresh interval
/// and opportunistically reaps sessions that missed their expiry window.
/// Reaping here runs without the fixed lock: unlinks of dead sessions' files
/// are idempotent and racing another reaper is harmless.
#[derive(Debug)]
pub(crate) struct Refresher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    pub fn spawn(ctx: RepositoryContext, config: Config, session: String) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(format!("refresher-{}", ctx.registry))
            .spawn(move || run(ctx, config, session, thread_stop))
            .ok();
        if handle.is_none() {
            eprintln!(
                "Warning: could not start session refresher thread; \
                 this session will look stale to others after the expiry window"
            );
        }

        Self { stop, handle }
    }

    /// Signal the thread and wait for it to finish.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            eprintln!("Warning: session refresher thread panicked");
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        // stop() detaches the handle; a drop without stop() just signals the
        // thread and lets it wind down on its own.
        self.stop.store(true, Ordering::Release);
    }
}

fn run(ctx: RepositoryContext, config: Config, session: String, stop: Arc<AtomicBool>) {
    let session_path = ctx.session_file_path(&session);
    let interval = Duration::from_secs(config.refresh_interval_secs);

    while !stop.load(Ordering::Acquire) {
        if let Err(e) = touch_session_file(&session_path) {
            // A missing liveness file here means somebody reaped a session
            // they believed dead; the touch above recreated it, but the gap
            // may have cost us job locks, so make noise.
            eprintln!(
                "Warning: failed to refresh session file '{}': {}",
                session_path.display(),
                e
            );
        }

        if let Err(e) = reap_dead_sessions(&ctx, &config, Some(&session)) {
            eprintln!("Warning: session cleanup failed: {}", e);
        }

        let deadline = Instant::now() + interval;
        while Instant::now() < deadline {
            if stop.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}
