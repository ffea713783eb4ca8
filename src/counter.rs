//! Monotonic job-ID counter.
//!
//! The counter file (`<registry>/cnt`) holds the next ID to hand out as a
//! plain-text integer, shared by every session under the root. All writes
//! happen under the registry's fixed lock; the `&LockGuard` parameters on the
//! mutating methods make that contract part of the signature instead of a
//! comment.
//!
//! IDs are never reused: the counter only moves forward, and a disk value
//! that has gone backwards (restored backup, manual edit) is overruled by the
//! in-memory high-water mark.

use crate::config::Config;
use crate::context::RepositoryContext;
use crate::error::{RepoError, Result};
use crate::fs::atomic_write_file;
use crate::locks::LockGuard;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug)]
pub struct CounterStore {
    path: PathBuf,
    minimum: u64,
    count: u64,
}

impl CounterStore {
    /// Attach to a registry's counter file. Touches no disk state until the
    /// first `read`.
    pub fn attach(ctx: &RepositoryContext, config: &Config) -> Self {
        Self {
            path: ctx.counter_path(),
            minimum: config.minimum_count,
            count: config.minimum_count,
        }
    }

    /// The next ID that would be allocated, per the last read.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Read the counter from disk and reconcile it with the in-memory value.
    ///
    /// A missing file is bootstrapped to the configured minimum. A file that
    /// does not parse as an integer is a hard failure: guessing a counter
    /// value risks handing out IDs that already name records.
    pub fn read(&mut self) -> Result<u64> {
        let disk = match fs::read_to_string(&self.path) {
            Ok(content) => {
                content.trim().parse::<u64>().map_err(|_| {
                    RepoError::Repository(format!(
                        "corrupt counter file '{}': expected an integer, found {:?}.\n\
                         Restore it to a value no lower than the highest existing job ID.",
                        self.path.display(),
                        content.trim()
                    ))
                })?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let value = self.count.max(self.minimum);
                self.persist(value)?;
                value
            }
            Err(e) => {
                return Err(RepoError::Repository(format!(
                    "failed to read counter file '{}': {}",
                    self.path.display(),
                    e
                )));
            }
        };

        self.count = self.count.max(disk);
        Ok(self.count)
    }

    /// Write a new counter value. The value never moves backwards.
    pub fn write(&mut self, value: u64, _guard: &LockGuard) -> Result<()> {
        let value = value.max(self.count);
        self.persist(value)?;
        self.count = value;
        Ok(())
    }

    /// Allocate `n` consecutive IDs, advancing the counter past them.
    pub fn allocate(&mut self, n: u64, guard: &LockGuard) -> Result<Vec<u64>> {
        let start = self.read()?;
        let ids: Vec<u64> = (start..start + n).collect();
        self.write(start + n, guard)?;
        Ok(ids)
    }

    fn persist(&self, value: u64) -> Result<()> {
        atomic_write_file(&self.path, &format!("{}\n", value))
    }
}
