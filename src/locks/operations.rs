//! Lock acquisition, listing, and clearing operations.

use super::guard::LockGuard;
use super::metadata::LockMetadata;
use super::types::LockInfo;
use crate::config::Config;
use crate::context::RepositoryContext;
use crate::error::{RepoError, Result};
use crate::session::session_is_live;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::thread;

/// Filename suffix of fixed-lock files within the sessions directory.
const FIXED_LOCK_SUFFIX: &str = "_fixed_lock";

/// One exclusive-create attempt on a lock file.
///
/// Returns `Ok(None)` when the file already exists (somebody else holds it),
/// `Ok(Some(guard))` on success. Any other filesystem failure is fatal.
fn try_create(lock_path: &Path, metadata: &LockMetadata) -> Result<Option<LockGuard>> {
    if let Some(parent) = lock_path.parent()
        && !parent.exists()
    {
        // A concurrent mkdir by another session is fine; create_dir_all
        // treats an existing directory as success.
        fs::create_dir_all(parent).map_err(|e| {
            RepoError::Repository(format!(
                "failed to create sessions directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => {
            return Err(RepoError::Repository(format!(
                "failed to create lock file '{}': {}",
                lock_path.display(),
                e
            )));
        }
    };

    let json = metadata.to_json()?;
    let write_result = file
        .write_all(json.as_bytes())
        .and_then(|()| file.sync_all());
    if let Err(e) = write_result {
        // Do not leave a half-written lock behind.
        let _ = fs::remove_file(lock_path);
        return Err(RepoError::Repository(format!(
            "failed to write lock metadata to '{}': {}",
            lock_path.display(),
            e
        )));
    }

    Ok(Some(LockGuard::new(lock_path.to_path_buf())))
}

/// Describe the current holder of a lock file for error messages.
fn holder_description(lock_path: &Path) -> String {
    match LockMetadata::from_file(lock_path) {
        Ok(meta) => format!(
            "held by session {} ({}, created {} ago, action: {})",
            meta.session,
            meta.owner,
            meta.age_string(),
            meta.action
        ),
        Err(_) => "holder unknown (lock file carries no readable metadata)".to_string(),
    }
}

/// Whether the lock file's owning session is presumed dead.
///
/// A lock without readable metadata is treated as live: it may be mid-write
/// by another process, and the retry loop will look again shortly.
fn holder_is_stale(ctx: &RepositoryContext, config: &Config, lock_path: &Path) -> bool {
    match LockMetadata::from_file(lock_path) {
        Ok(meta) => !session_is_live(ctx, &meta.session, config.session_expiry()),
        Err(_) => false,
    }
}

/// Acquire the fixed lock for this registry.
///
/// The fixed lock serializes counter allocation and session lock-set
/// mutations across all sessions sharing the repository root. Hold it only
/// for the duration of a critical section.
///
/// Contention against a *live* holder is retried with the configured bounded
/// backoff, then fails with `RepoError::Lock`. A *stale* holder (owning
/// session dead) means a session crashed inside a critical section; that is
/// a hard `RepoError::Repository` requiring operator attention, unless
/// `reclaim_stale_locks` is enabled, in which case the lock is reclaimed
/// with a warning.
pub fn acquire_fixed_lock(
    ctx: &RepositoryContext,
    config: &Config,
    session: &str,
    action: &str,
) -> Result<LockGuard> {
    let lock_path = ctx.fixed_lock_path();
    let metadata = LockMetadata::new(session, action);
    let policy = config.lock_retry_policy();
    let attempts = policy.max_attempts.max(1);

    for attempt in 0..attempts {
        if let Some(guard) = try_create(&lock_path, &metadata)? {
            return Ok(guard);
        }

        if holder_is_stale(ctx, config, &lock_path) {
            if config.reclaim_stale_locks {
                eprintln!(
                    "Warning: reclaiming stale fixed lock '{}' ({})",
                    lock_path.display(),
                    holder_description(&lock_path)
                );
                match fs::remove_file(&lock_path) {
                    Ok(()) => continue,
                    // Someone else reclaimed it first; retry the create.
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => {
                        return Err(RepoError::Repository(format!(
                            "failed to reclaim stale lock '{}': {}",
                            lock_path.display(),
                            e
                        )));
                    }
                }
            }
            return Err(RepoError::Repository(format!(
                "stale fixed lock found: '{}' is {}.\n\
                 A previous session appears to have died while holding it.\n\
                 Inspect the repository, then remove the lock file or run `jobrepo reap`,\n\
                 or set `reclaim_stale_locks: true` in config.yaml to reclaim automatically.",
                lock_path.display(),
                holder_description(&lock_path)
            )));
        }

        if attempt + 1 < attempts {
            thread::sleep(policy.backoff);
        }
    }

    Err(RepoError::Lock(format!(
        "fixed lock '{}' is {} after {} attempts",
        lock_path.display(),
        holder_description(&lock_path),
        attempts
    )))
}

/// Non-blocking check for the presence of a lock file.
pub fn is_locked(lock_path: &Path) -> bool {
    lock_path.exists()
}

/// List all fixed locks under the sessions directory.
pub fn list_locks(ctx: &RepositoryContext, config: &Config) -> Result<Vec<LockInfo>> {
    let mut locks = Vec::new();

    let sessions_dir = ctx.sessions_dir();
    if !sessions_dir.exists() {
        return Ok(locks);
    }

    let entries = fs::read_dir(&sessions_dir).map_err(|e| {
        RepoError::UserError(format!(
            "failed to read sessions directory '{}': {}",
            sessions_dir.display(),
            e
        ))
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            RepoError::UserError(format!("failed to read sessions directory entry: {}", e))
        })?;
        let path = entry.path();

        let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(registry) = filename.strip_suffix(FIXED_LOCK_SUFFIX) else {
            continue;
        };
        let registry = registry.to_string();

        let metadata = LockMetadata::from_file(&path).ok();
        let is_stale = match &metadata {
            Some(meta) => !session_is_live(ctx, &meta.session, config.session_expiry()),
            // No metadata to point at a session: only the file's absence
            // would prove liveness, so report it as stale for the operator.
            None => true,
        };

        locks.push(LockInfo {
            path,
            registry,
            metadata,
            is_stale,
        });
    }

    locks.sort_by(|a, b| a.registry.cmp(&b.registry));
    Ok(locks)
}

/// Remove a registry's fixed-lock file.
///
/// The caller is responsible for verifying that clearing is appropriate
/// (stale holder, or an explicit `--force`). Returns information about the
/// cleared lock for audit purposes.
pub fn clear_lock(ctx: &RepositoryContext, config: &Config) -> Result<LockInfo> {
    let lock_path = ctx.fixed_lock_path();

    if !lock_path.exists() {
        return Err(RepoError::UserError(format!(
            "no fixed lock for registry '{}' at: {}",
            ctx.registry,
            lock_path.display()
        )));
    }

    let metadata = LockMetadata::from_file(&lock_path).ok();
    let is_stale = match &metadata {
        Some(meta) => !session_is_live(ctx, &meta.session, config.session_expiry()),
        None => true,
    };

    let info = LockInfo {
        path: lock_path.clone(),
        registry: ctx.registry.clone(),
        metadata,
        is_stale,
    };

    fs::remove_file(&lock_path).map_err(|e| {
        RepoError::UserError(format!(
            "failed to clear lock '{}': {}",
            lock_path.display(),
            e
        ))
    })?;

    Ok(info)
}
