//! Append-only audit log.
//!
//! Repository mutations (ID allocation, lock movements, record changes,
//! service gate flips) are appended to `<root>/events/events.ndjson` as one
//! JSON object per line, so an operator can reconstruct what each session did
//! and when. The log is advisory history, never consulted for correctness.
//!
//! Each line carries:
//! - `ts`: RFC3339 timestamp
//! - `action`: what happened (allocate, lock, reap, ...)
//! - `actor`: the owner string (`user@host`)
//! - `session`: the session that did it, when one exists
//! - `job`: job ID for record-level events
//! - `details`: freeform object with action-specific fields

use crate::context::RepositoryContext;
use crate::error::{RepoError, Result};
use crate::locks::owner_string;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Repository initialization
    Init,
    /// Session announced itself
    Startup,
    /// Session withdrew
    Shutdown,
    /// Job IDs allocated from the counter
    Allocate,
    /// Job IDs locked by a session
    Lock,
    /// Job IDs released by a session
    Release,
    /// Dead sessions' files reaped
    Reap,
    /// Fixed lock cleared manually
    LockClear,
    /// Job record registered
    Register,
    /// Job record removed
    Remove,
    /// Dirty job records flushed to disk
    Flush,
    /// Internal services disabled
    Disable,
    /// Internal services enabled
    Enable,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Init => write!(f, "init"),
            EventAction::Startup => write!(f, "startup"),
            EventAction::Shutdown => write!(f, "shutdown"),
            EventAction::Allocate => write!(f, "allocate"),
            EventAction::Lock => write!(f, "lock"),
            EventAction::Release => write!(f, "release"),
            EventAction::Reap => write!(f, "reap"),
            EventAction::LockClear => write!(f, "lock_clear"),
            EventAction::Register => write!(f, "register"),
            EventAction::Remove => write!(f, "remove"),
            EventAction::Flush => write!(f, "flush"),
            EventAction::Disable => write!(f, "disable"),
            EventAction::Enable => write!(f, "enable"),
        }
    }
}

/// An event record for the audit log.
///
/// Events are serialized as single-line JSON objects and appended to
/// the events.ndjson file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The action that was performed.
    pub action: EventAction,

    /// The actor who performed the action (e.g., `user@host`).
    pub actor: String,

    /// Session that performed the action, for session-scoped events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    /// Job ID for record-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<u64>,

    /// Freeform details object with action-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event with the given action.
    ///
    /// The timestamp is set to the current time, and the actor is determined
    /// from the environment (user@host).
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: owner_string(),
            session: None,
            job: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the session for this event.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Set the job ID for this event.
    pub fn with_job(mut self, id: u64) -> Self {
        self.job = Some(id);
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| RepoError::UserError(format!("failed to serialize event to JSON: {}", e)))
    }
}

/// Append an event to the audit log.
///
/// The file is created on first use, and each append results in one line
/// with a trailing newline, synced to disk. Appends from concurrent sessions
/// interleave whole lines (the file is opened in append mode and a line is
/// written with a single `write` call).
pub fn append_event(ctx: &RepositoryContext, event: &Event) -> Result<()> {
    let json_line = event.to_ndjson_line()?;

    let events_dir = ctx.events_dir();
    if !events_dir.exists() {
        fs::create_dir_all(&events_dir).map_err(|e| {
            RepoError::Repository(format!(
                "failed to create events directory '{}': {}",
                events_dir.display(),
                e
            ))
        })?;
    }

    let events_file = ctx.events_file();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&events_file)
        .map_err(|e| {
            RepoError::Repository(format!(
                "failed to open events file '{}': {}",
                events_file.display(),
                e
            ))
        })?;

    let mut line = json_line;
    line.push('\n');
    file.write_all(line.as_bytes()).map_err(|e| {
        RepoError::Repository(format!(
            "failed to write event to '{}': {}",
            events_file.display(),
            e
        ))
    })?;

    file.sync_all().map_err(|e| {
        RepoError::Repository(format!(
            "failed to sync events file '{}': {}",
            events_file.display(),
            e
        ))
    })?;

    Ok(())
}
