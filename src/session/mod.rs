//! Session tracking and per-job-ID lock arbitration.
//!
//! Every process attached to a repository is a *session*. A session announces
//! itself with a liveness file (`sessions/<name>.session`) that a background
//! refresher keeps touching, and records the job IDs it owns in a lock-set
//! file (`sessions/<name>.<registry>.locks`). A session whose liveness file
//! has not been refreshed within the configured expiry window is presumed
//! dead and its locks become reapable.
//!
//! All mutations of lock-set files happen under the registry's fixed lock.
//! The model is advisory and best-effort: the shared filesystem cannot give
//! us multi-file transactions, so correctness rests on conservative staleness
//! windows and idempotent retry rather than consensus. A peer's lock-set file
//! that is corrupt or vanishes mid-read is warned about and ignored.

mod refresher;


pub(crate) use refresher::Refresher;

use crate::config::Config;
use crate::context::{RepositoryContext, SESSION_SUFFIX};
use crate::error::{RepoError, Result};
use crate::fs::atomic_write_file;
use crate::locks::acquire_fixed_lock;
use chrono::Utc;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Generate a session name: `<host>.<millis>.PID.<pid>`.
///
/// The PID suffix keeps names from colliding on one host; the millisecond
/// timestamp keeps them from colliding across PID reuse. Within one process
/// the millisecond value is forced strictly increasing so that two sessions
/// opened back-to-back never share a name.
pub fn session_name() -> String {
    static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

    let now = Utc::now().timestamp_millis();
    let mut prev = LAST_MILLIS.load(Ordering::Relaxed);
    let millis = loop {
        let next = now.max(prev + 1);
        match LAST_MILLIS.compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break next,
            Err(seen) => prev = seen,
        }
    };

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}.{}.PID.{}", host, millis, std::process::id())
}

/// Refresh a session liveness file.
///
/// The file content is a human-readable timestamp for debugging; liveness
/// itself is judged from the file's mtime.
pub fn touch_session_file(path: &Path) -> std::io::Result<()> {
    fs::write(path, format!("{}\n", Utc::now().to_rfc3339()))
}

/// Whether a session is considered alive.
///
/// A session is live when its liveness file exists and was refreshed within
/// the expiry window. Stat failures on an existing file count as live: on a
/// loaded network filesystem a transient stat error must not get a healthy
/// session reaped.
pub fn session_is_live(ctx: &RepositoryContext, session: &str, expiry: Duration) -> bool {
    let path = ctx.session_file_path(session);
    match fs::metadata(&path) {
        Ok(meta) => match meta.modified().and_then(|m| {
            m.elapsed()
                .map_err(|e| std::io::Error::new(ErrorKind::Other, e))
        }) {
            Ok(age) => age <= expiry,
            // Clock skew or stat trouble: assume live.
            Err(_) => true,
        },
        Err(_) => false,
    }
}

/// List all sessions under the root with their liveness.
pub fn list_sessions(ctx: &RepositoryContext, config: &Config) -> Result<Vec<(String, bool)>> {
    let sessions_dir = ctx.sessions_dir();
    if !sessions_dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&sessions_dir).map_err(|e| {
        RepoError::UserError(format!(
            "failed to read sessions directory '{}': {}",
            sessions_dir.display(),
            e
        ))
    })?;

    let mut sessions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            RepoError::UserError(format!("failed to read sessions directory entry: {}", e))
        })?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(session) = name.strip_suffix(SESSION_SUFFIX) {
            let live = session_is_live(ctx, session, config.session_expiry());
            sessions.push((session.to_string(), live));
        }
    }

    sessions.sort();
    Ok(sessions)
}

/// Remove session and lock-set files of sessions presumed dead.
///
/// `keep` is the caller's own session, never reaped regardless of mtime.
/// Also removes orphan lock-set files whose session file is already gone.
/// Returns whether anything was removed. Unlink races with other reapers are
/// normal and ignored.
///
/// Callers must hold the fixed lock (or accept the race, as the background
/// refresher does for opportunistic cleanup).
pub fn reap_dead_sessions(
    ctx: &RepositoryContext,
    config: &Config,
    keep: Option<&str>,
) -> Result<bool> {
    let sessions_dir = ctx.sessions_dir();
    if !sessions_dir.exists() {
        return Ok(false);
    }

    let mut reaped = false;
    let mut live: BTreeSet<String> = BTreeSet::new();

    for (session, is_live) in list_sessions(ctx, config)? {
        if Some(session.as_str()) == keep {
            live.insert(session);
            continue;
        }
        if is_live {
            live.insert(session);
            continue;
        }

        eprintln!(
            "Warning: removing session {} because of inactivity (no update within {}s)",
            session, config.session_expiry_secs
        );
        if remove_quietly(&ctx.session_file_path(&session)) {
            reaped = true;
        }
    }

    // Lock-set files not owned by a live session are orphans.
    let entries = fs::read_dir(&sessions_dir).map_err(|e| {
        RepoError::UserError(format!(
            "failed to read sessions directory '{}': {}",
            sessions_dir.display(),
            e
        ))
    })?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = name.strip_suffix(".locks") else {
            continue;
        };
        // <session>.<registry>.locks
        let Some(session) = stem.rsplit_once('.').map(|(s, _)| s) else {
            continue;
        };
        if live.contains(session) {
            continue;
        }
        if remove_quietly(&entry.path()) {
            reaped = true;
        }
    }

    Ok(reaped)
}

/// Remove a file, treating "already gone" as not-removed-by-us and logging
/// anything else. Another process deleting the file first is unimportant.
fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            eprintln!("Warning: failed to remove '{}': {}", path.display(), e);
            false
        }
    }
}

/// Tracks this process's session and the job IDs it has locked.
///
/// All lock-set mutations go through the fixed lock; per-method acquisition
/// keeps the critical sections short so concurrent sessions interleave.
#[derive(Debug)]
pub struct SessionRegistry {
    ctx: RepositoryContext,
    config: Config,
    name: String,
    locked: BTreeSet<u64>,
    refresher: Option<Refresher>,
    started: bool,
}

impl SessionRegistry {
    pub fn new(ctx: RepositoryContext, config: Config) -> Self {
        Self {
            ctx,
            config,
            name: session_name(),
            locked: BTreeSet::new(),
            refresher: None,
            started: false,
        }
    }

    /// This session's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// IDs currently locked by this session.
    pub fn locked_ids(&self) -> Vec<u64> {
        self.locked.iter().copied().collect()
    }

    fn locks_path(&self) -> PathBuf {
        self.ctx.session_locks_path(&self.name)
    }

    fn session_path(&self) -> PathBuf {
        self.ctx.session_file_path(&self.name)
    }

    /// Announce this session: create the liveness file and an empty lock-set
    /// file under the fixed lock, then start the background refresher.
    pub fn startup(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        let guard = acquire_fixed_lock(&self.ctx, &self.config, &self.name, "session_startup")?;

        let session_path = self.session_path();
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&session_path)
        {
            Ok(mut file) => {
                let stamp = format!("{}\n", Utc::now().to_rfc3339());
                file.write_all(stamp.as_bytes()).map_err(|e| {
                    RepoError::Repository(format!(
                        "failed to write session file '{}': {}",
                        session_path.display(),
                        e
                    ))
                })?;
            }
            Err(e) => {
                // Name collision would need the same host, pid and
                // millisecond; anything here is a real failure.
                return Err(RepoError::Repository(format!(
                    "failed to create session file '{}': {}",
                    session_path.display(),
                    e
                )));
            }
        }

        self.locked.clear();
        self.write_locked()?;
        drop(guard);

        self.refresher = Some(Refresher::spawn(
            self.ctx.clone(),
            self.config.clone(),
            self.name.clone(),
        ));
        self.started = true;
        Ok(())
    }

    /// Persist this session's lock set.
    ///
    /// The fixed lock must be held when this races other sessions' reads;
    /// startup and shutdown paths call it under the guard.
    fn write_locked(&self) -> Result<()> {
        let ids: Vec<u64> = self.locked.iter().copied().collect();
        let json = serde_json::to_string(&ids).map_err(|e| {
            RepoError::Repository(format!("failed to serialize lock set: {}", e))
        })?;
        atomic_write_file(self.locks_path(), &json)
    }

    /// Read a peer's lock-set file.
    ///
    /// Missing means the peer shut down or was reaped between listing and
    /// reading; corrupt means a crash mid-write under an older layout. Both
    /// are survivable: warn and treat as empty.
    fn read_peer_locks(path: &Path) -> BTreeSet<u64> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return BTreeSet::new(),
            Err(e) => {
                eprintln!(
                    "Warning: inaccessible session lock file '{}' - ignoring it ({})",
                    path.display(),
                    e
                );
                return BTreeSet::new();
            }
        };
        match serde_json::from_str::<Vec<u64>>(&content) {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                eprintln!(
                    "Warning: corrupt session lock file '{}' - ignoring it ({})",
                    path.display(),
                    e
                );
                BTreeSet::new()
            }
        }
    }

    /// Lock-set files of other sessions for this registry.
    fn peer_lock_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let sessions_dir = self.ctx.sessions_dir();
        let entries = fs::read_dir(&sessions_dir).map_err(|e| {
            RepoError::Repository(format!(
                "could not list sessions directory '{}': {}",
                sessions_dir.display(),
                e
            ))
        })?;

        let suffix = format!(".{}.locks", self.ctx.registry);
        let mut peers = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(session) = name.strip_suffix(&suffix) else {
                continue;
            };
            if session == self.name {
                continue;
            }
            peers.push((session.to_string(), entry.path()));
        }
        Ok(peers)
    }

    /// Try to lock each of `ids` for this session.
    ///
    /// Best-effort: IDs already held by another session are skipped, and the
    /// successfully locked subset is returned. Partial failure is a normal
    /// outcome, never an error. Locking an ID this session already holds is
    /// an idempotent success.
    pub fn lock_ids(&mut self, ids: &[u64]) -> Result<Vec<u64>> {
        let guard = acquire_fixed_lock(&self.ctx, &self.config, &self.name, "lock_ids")?;

        let mut wanted: BTreeSet<u64> = ids.iter().copied().collect();
        for (_, path) in self.peer_lock_files()? {
            let theirs = Self::read_peer_locks(&path);
            wanted.retain(|id| !theirs.contains(id));
        }

        self.locked.extend(wanted.iter().copied());
        self.write_locked()?;
        drop(guard);

        Ok(wanted.into_iter().collect())
    }

    /// Release each of `ids` that this session actually holds.
    ///
    /// Returns the released subset; releasing an ID twice yields an empty
    /// second result, not an error.
    pub fn release_ids(&mut self, ids: &[u64]) -> Result<Vec<u64>> {
        let guard = acquire_fixed_lock(&self.ctx, &self.config, &self.name, "release_ids")?;

        let released: Vec<u64> = ids
            .iter()
            .copied()
            .filter(|id| self.locked.remove(id))
            .collect();
        self.write_locked()?;
        drop(guard);

        Ok(released)
    }

    /// Which session holds the lock on `id`, if any.
    pub fn get_lock_session(&self, id: u64) -> Result<Option<String>> {
        if self.locked.contains(&id) {
            return Ok(Some(self.name.clone()));
        }

        let guard = acquire_fixed_lock(&self.ctx, &self.config, &self.name, "get_lock_session")?;
        let mut holder = None;
        for (session, path) in self.peer_lock_files()? {
            if Self::read_peer_locks(&path).contains(&id) {
                holder = Some(session);
                break;
            }
        }
        drop(guard);
        Ok(holder)
    }

    /// Other sessions currently considered live.
    pub fn get_other_sessions(&self) -> Result<Vec<String>> {
        Ok(list_sessions(&self.ctx, &self.config)?
            .into_iter()
            .filter(|(session, live)| *live && session != &self.name)
            .map(|(session, _)| session)
            .collect())
    }

    /// Reclaim locks of sessions presumed dead.
    ///
    /// Returns whether any reaping occurred, so callers can decide whether a
    /// retry (e.g. of startup or lock_ids) is worthwhile.
    pub fn reap_locks(&mut self) -> Result<bool> {
        let guard = acquire_fixed_lock(&self.ctx, &self.config, &self.name, "reap_locks")?;
        let reaped = reap_dead_sessions(&self.ctx, &self.config, Some(&self.name))?;
        drop(guard);
        Ok(reaped)
    }

    /// Withdraw this session: stop the refresher and remove our files.
    ///
    /// Always terminates; failures are logged and skipped rather than
    /// hanging shutdown. Files already removed (by a reaper that outran a
    /// long pause, say) are not errors.
    pub fn shutdown(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.stop();
        }

        self.locked.clear();
        for path in [self.locks_path(), self.session_path()] {
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                eprintln!(
                    "Warning: failed to remove session file '{}': {}",
                    path.display(),
                    e
                );
            }
        }
        self.started = false;
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if self.started {
            self.shutdown();
        }
    }
}
