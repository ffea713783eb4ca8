//! On-disk job records.
//!
//! One JSON file per job under `<registry>/<id>.json`, written atomically so
//! readers in other sessions never see a partial record.

use crate::error::{RepoError, Result};
use crate::fs::atomic_write_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Submitted,
    Running,
    Completed,
    Failed,
    Killed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::New => write!(f, "new"),
            JobStatus::Submitted => write!(f, "submitted"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Killed => write!(f, "killed"),
        }
    }
}

/// A job record.
///
/// The `data` field is an opaque JSON object owned by whatever submitted the
/// job; the repository only guarantees its durability, never its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub data: Value,
}

impl JobRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            status: JobStatus::New,
            created_at: Utc::now(),
            data: Value::Object(serde_json::Map::new()),
        }
    }

    /// Load a record from disk.
    ///
    /// A missing file means the ID was never registered (or was removed); a
    /// file that does not parse means the repository needs attention.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RepoError::UserError(format!(
                    "no job record at '{}'",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(RepoError::Repository(format!(
                    "failed to read job record '{}': {}",
                    path.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            RepoError::Repository(format!(
                "corrupt job record '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the record to disk atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            RepoError::Repository(format!("failed to serialize job record {}: {}", self.id, e))
        })?;
        atomic_write_file(path, &json)
    }
}
