//! Repository path resolution.
//!
//! All on-disk coordination state lives under a single repository root:
//!
//! ```text
//! <root>/
//!   config.yaml                      repository configuration
//!   sessions/                        liveness markers and lock files
//!     <registry>_fixed_lock          global allocation/arbitration lock
//!     <session>.session              liveness marker, refreshed on a timer
//!     <session>.<registry>.locks     job IDs owned by that session
//!   <registry>/
//!     cnt                            next-ID counter (plain-text integer)
//!     <id>.json                      one job record per ID
//!   events/
//!     events.ndjson                  append-only audit log
//! ```
//!
//! Every component resolves paths through this module so that multiple
//! processes sharing the root always agree on the layout.

use crate::error::{RepoError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix of session liveness files.
pub const SESSION_SUFFIX: &str = ".session";

/// Name of the events log file.
pub const EVENTS_FILE: &str = "events.ndjson";

/// Resolved paths for one registry inside a repository root.
///
/// All paths are derived from `root` and `registry`; the struct itself never
/// touches the filesystem except in `ensure_dirs`/`ensure_initialized`.
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    /// Absolute or caller-relative repository root.
    pub root: PathBuf,

    /// Registry name (e.g. "jobs", "templates").
    pub registry: String,
}

impl RepositoryContext {
    pub fn new<P: AsRef<Path>>(root: P, registry: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            registry: registry.to_string(),
        }
    }

    /// Directory holding session markers and lock files, shared by all
    /// registries under this root.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    /// Directory holding this registry's counter and job records.
    pub fn registry_dir(&self) -> PathBuf {
        self.root.join(&self.registry)
    }

    /// The next-ID counter file.
    pub fn counter_path(&self) -> PathBuf {
        self.registry_dir().join("cnt")
    }

    /// The fixed lock serializing counter allocation and session-set
    /// mutations for this registry.
    pub fn fixed_lock_path(&self) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}_fixed_lock", self.registry))
    }

    /// Liveness marker for a session.
    pub fn session_file_path(&self, session: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}{}", session, SESSION_SUFFIX))
    }

    /// Lock-set file for a session: the job IDs it owns in this registry.
    pub fn session_locks_path(&self, session: &str) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}.{}.locks", session, self.registry))
    }

    /// Job record path, partitioned by ID so sessions writing different jobs
    /// never contend.
    pub fn record_path(&self, id: u64) -> PathBuf {
        self.registry_dir().join(format!("{}.json", id))
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn events_file(&self) -> PathBuf {
        self.events_dir().join(EVENTS_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    /// Whether the repository layout exists on disk.
    pub fn is_initialized(&self) -> bool {
        self.sessions_dir().exists() && self.registry_dir().exists()
    }

    /// Fail with a remedy message if the repository has not been initialized.
    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(RepoError::UserError(format!(
                "repository not initialized.\n\
                 Expected layout under: {}\n\n\
                 Run `jobrepo init` to initialize a repository at this root.",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Create the repository directories.
    ///
    /// Racing against another process creating the same directories is
    /// normal; `create_dir_all` treats an existing directory as success.
    /// Any other failure is fatal.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.sessions_dir(), self.registry_dir(), self.events_dir()] {
            fs::create_dir_all(&dir).map_err(|e| {
                RepoError::Repository(format!(
                    "failed to create directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}
