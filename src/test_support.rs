use crate::config::Config;
use crate::context::RepositoryContext;
use std::fs::{File, FileTimes};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

static CWD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub(crate) struct DirGuard {
    original: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl DirGuard {
    pub(crate) fn new(new_dir: &Path) -> Self {
        // Changing the process current working directory is global and not thread-safe.
        // Lock it so tests don't race even if a #[serial] annotation is missed.
        let lock = CWD_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(new_dir).unwrap();
        Self {
            original,
            _lock: lock,
        }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.original);
    }
}

/// An initialized repository in a temp directory with default configuration.
pub(crate) fn create_test_repo() -> (TempDir, RepositoryContext, Config) {
    let temp_dir = TempDir::new().unwrap();
    let ctx = RepositoryContext::new(temp_dir.path(), "jobs");
    ctx.ensure_dirs().unwrap();
    (temp_dir, ctx, Config::default())
}

/// Create a liveness file so `session` counts as alive.
pub(crate) fn mark_session_live(ctx: &RepositoryContext, session: &str) {
    crate::session::touch_session_file(&ctx.session_file_path(session)).unwrap();
}

/// Create a liveness file with an mtime far in the past so `session` counts
/// as dead under any reasonable expiry window.
pub(crate) fn mark_session_stale(ctx: &RepositoryContext, session: &str) {
    let path = ctx.session_file_path(session);
    crate::session::touch_session_file(&path).unwrap();
    let long_ago = SystemTime::now() - Duration::from_secs(3600);
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_times(FileTimes::new().set_modified(long_ago))
        .unwrap();
}
