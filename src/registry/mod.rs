//! The job registry façade.
//!
//! `JobRegistry` ties the pieces together for one session: the session and
//! its per-ID locks, the shared ID counter, the services gate, and an
//! in-memory cache of job records with dirty tracking. Callers go through
//! this type; the lower layers stay free of policy.
//!
//! Mutations require two things: the services gate must be open, and the
//! session must hold the per-ID lock for the record it touches. Reads need
//! neither, so a disabled repository can still be inspected.

mod record;

#[cfg(test)]
mod tests;

pub use record::{JobRecord, JobStatus};

use crate::config::Config;
use crate::context::RepositoryContext;
use crate::coordinator::Coordinator;
use crate::counter::CounterStore;
use crate::error::{RepoError, Result};
use crate::events::{Event, EventAction, append_event};
use crate::locks::acquire_fixed_lock;
use crate::session::SessionRegistry;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Arc;

#[derive(Debug)]
pub struct JobRegistry {
    ctx: RepositoryContext,
    config: Config,
    session: SessionRegistry,
    counter: CounterStore,
    coordinator: Arc<Coordinator>,
    cache: BTreeMap<u64, JobRecord>,
    dirty: BTreeSet<u64>,
    started: bool,
}

impl JobRegistry {
    pub fn new(ctx: RepositoryContext, config: Config, coordinator: Arc<Coordinator>) -> Self {
        let session = SessionRegistry::new(ctx.clone(), config.clone());
        let counter = CounterStore::attach(&ctx, &config);
        Self {
            ctx,
            config,
            session,
            counter,
            coordinator,
            cache: BTreeMap::new(),
            dirty: BTreeSet::new(),
            started: false,
        }
    }

    /// This session's name.
    pub fn session_name(&self) -> &str {
        self.session.name()
    }

    /// Attach to the repository: announce the session, make sure the counter
    /// exists, and report concurrent users.
    ///
    /// A stale fixed lock left by a crashed session surfaces here as a hard
    /// error (unless reclamation is configured); better to fail attach than
    /// to work next to a possibly half-finished critical section.
    pub fn startup(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.ctx.ensure_initialized()?;

        self.session.startup()?;

        let guard = acquire_fixed_lock(&self.ctx, &self.config, self.session.name(), "startup")?;
        self.counter.read()?;
        drop(guard);

        let others = self.session.get_other_sessions()?;
        if !others.is_empty() {
            eprintln!(
                "Warning: registry '{}' is in use by {} other session(s): {}",
                self.ctx.registry,
                others.len(),
                others.join(", ")
            );
        }

        self.log_event(Event::new(EventAction::Startup), json!({}));
        self.started = true;
        Ok(())
    }

    /// Allocate `n` fresh job IDs and lock them to this session.
    ///
    /// The IDs are globally unique across all sessions sharing the root;
    /// they come out of the counter under the fixed lock. Locking them to
    /// this session cannot contend: nobody else has seen them yet.
    pub fn make_new_ids(&mut self, n: u64) -> Result<Vec<u64>> {
        self.coordinator.check_internal_services()?;

        let guard = acquire_fixed_lock(&self.ctx, &self.config, self.session.name(), "allocate")?;
        let ids = self.counter.allocate(n, &guard)?;
        drop(guard);

        let locked = self.session.lock_ids(&ids)?;
        if locked.len() != ids.len() {
            // Can only happen if another session guessed unallocated IDs.
            return Err(RepoError::Repository(format!(
                "freshly allocated IDs already locked elsewhere: wanted {:?}, got {:?}",
                ids, locked
            )));
        }

        self.log_event(Event::new(EventAction::Allocate), json!({ "ids": ids }));
        Ok(ids)
    }

    /// Lock existing job IDs to this session. Best-effort: returns the
    /// successfully locked subset.
    pub fn lock_ids(&mut self, ids: &[u64]) -> Result<Vec<u64>> {
        self.coordinator.check_internal_services()?;
        let locked = self.session.lock_ids(ids)?;
        self.log_event(Event::new(EventAction::Lock), json!({ "ids": locked }));
        Ok(locked)
    }

    /// Release job IDs held by this session. Returns the subset actually
    /// released; releasing twice finds nothing the second time.
    pub fn release_ids(&mut self, ids: &[u64]) -> Result<Vec<u64>> {
        self.coordinator.check_internal_services()?;
        let released = self.session.release_ids(ids)?;
        self.log_event(Event::new(EventAction::Release), json!({ "ids": released }));
        Ok(released)
    }

    /// Which session holds the lock on `id`, if any.
    pub fn get_lock_session(&self, id: u64) -> Result<Option<String>> {
        self.session.get_lock_session(id)
    }

    /// Reclaim locks of dead sessions. Returns whether anything was reaped.
    pub fn reap_locks(&mut self) -> Result<bool> {
        let reaped = self.session.reap_locks()?;
        if reaped {
            self.log_event(Event::new(EventAction::Reap), json!({}));
        }
        Ok(reaped)
    }

    /// Require that this session holds the per-ID lock, taking it if free.
    fn require_lock(&mut self, id: u64) -> Result<()> {
        if self.session.lock_ids(&[id])?.contains(&id) {
            return Ok(());
        }
        let holder = self
            .session
            .get_lock_session(id)?
            .unwrap_or_else(|| "unknown".to_string());
        Err(RepoError::Lock(format!(
            "job {} is locked by session {}",
            id, holder
        )))
    }

    /// Register a record under an ID this session has allocated or locked.
    ///
    /// The record lands in the cache as dirty; `flush` makes it durable.
    pub fn register(&mut self, record: JobRecord) -> Result<()> {
        self.coordinator.check_internal_services()?;
        let id = record.id;
        self.require_lock(id)?;

        if self.cache.contains_key(&id) || self.ctx.record_path(id).exists() {
            return Err(RepoError::UserError(format!(
                "job {} is already registered",
                id
            )));
        }

        self.cache.insert(id, record);
        self.dirty.insert(id);
        self.log_event(Event::new(EventAction::Register).with_job(id), json!({}));
        Ok(())
    }

    /// Fetch a record, reading through to disk on a cache miss.
    ///
    /// Reads work on a disabled repository and on records locked elsewhere;
    /// the cached copy may then lag behind the locking session's updates.
    pub fn get(&mut self, id: u64) -> Result<&JobRecord> {
        if !self.cache.contains_key(&id) {
            let record = JobRecord::load(&self.ctx.record_path(id))?;
            self.cache.insert(id, record);
        }
        Ok(&self.cache[&id])
    }

    /// Update a record's status and data in the cache.
    pub fn update(&mut self, id: u64, status: JobStatus, data: Value) -> Result<()> {
        self.coordinator.check_internal_services()?;
        self.require_lock(id)?;

        // Make sure the record exists before touching it.
        self.get(id)?;
        let record = self.cache.get_mut(&id).ok_or_else(|| {
            RepoError::Repository(format!("job {} vanished from the cache", id))
        })?;
        record.status = status;
        record.data = data;
        self.dirty.insert(id);
        Ok(())
    }

    /// Remove a record from disk and cache, releasing its lock.
    pub fn remove(&mut self, id: u64) -> Result<()> {
        self.coordinator.check_internal_services()?;
        self.require_lock(id)?;

        let path = self.ctx.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            // Registered but never flushed: nothing on disk yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !self.cache.contains_key(&id) {
                    self.session.release_ids(&[id])?;
                    return Err(RepoError::UserError(format!("no job record for ID {}", id)));
                }
            }
            Err(e) => {
                return Err(RepoError::Repository(format!(
                    "failed to remove job record '{}': {}",
                    path.display(),
                    e
                )));
            }
        }

        self.cache.remove(&id);
        self.dirty.remove(&id);
        self.session.release_ids(&[id])?;
        self.log_event(Event::new(EventAction::Remove).with_job(id), json!({}));
        Ok(())
    }

    /// Write one dirty record to disk.
    pub fn flush(&mut self, id: u64) -> Result<()> {
        self.coordinator.check_internal_services()?;
        if !self.dirty.contains(&id) {
            return Ok(());
        }
        let record = self.cache.get(&id).ok_or_else(|| {
            RepoError::Repository(format!("dirty job {} has no cached record", id))
        })?;
        record.save(&self.ctx.record_path(id))?;
        self.dirty.remove(&id);
        Ok(())
    }

    /// Write all dirty records to disk.
    pub fn flush_all(&mut self) -> Result<()> {
        self.coordinator.check_internal_services()?;
        let ids: Vec<u64> = self.dirty.iter().copied().collect();
        for id in &ids {
            let record = self.cache.get(id).ok_or_else(|| {
                RepoError::Repository(format!("dirty job {} has no cached record", id))
            })?;
            record.save(&self.ctx.record_path(*id))?;
        }
        self.dirty.clear();
        if !ids.is_empty() {
            self.log_event(Event::new(EventAction::Flush), json!({ "ids": ids }));
        }
        Ok(())
    }

    /// IDs with dirty (unflushed) cached records.
    pub fn dirty_ids(&self) -> Vec<u64> {
        self.dirty.iter().copied().collect()
    }

    /// All job IDs present on disk, sorted.
    pub fn ids(&self) -> Result<Vec<u64>> {
        let dir = self.ctx.registry_dir();
        let entries = fs::read_dir(&dir).map_err(|e| {
            RepoError::Repository(format!(
                "failed to read registry directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json")
                && let Ok(id) = stem.parse::<u64>()
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Detach from the repository: flush what we can, withdraw the session.
    ///
    /// With the gate closed, dirty records cannot be written; they are
    /// reported and dropped rather than leaking the session.
    pub fn shutdown(&mut self) {
        if !self.started {
            return;
        }

        if self.coordinator.services_enabled() {
            if let Err(e) = self.flush_all() {
                eprintln!("Warning: failed to flush job records on shutdown: {}", e);
            }
        } else if !self.dirty.is_empty() {
            eprintln!(
                "Warning: discarding {} unflushed job record(s); internal services are disabled",
                self.dirty.len()
            );
        }

        self.log_event(Event::new(EventAction::Shutdown), json!({}));
        self.session.shutdown();
        self.cache.clear();
        self.dirty.clear();
        self.started = false;
    }

    fn log_event(&self, event: Event, details: Value) {
        let event = event
            .with_session(self.session.name())
            .with_details(details);
        if let Err(e) = append_event(&self.ctx, &event) {
            eprintln!("Warning: failed to record audit event: {}", e);
        }
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        if self.started {
            self.shutdown();
        }
    }
}
