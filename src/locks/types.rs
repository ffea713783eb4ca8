//! Lock information structures.

use super::metadata::LockMetadata;
use std::path::PathBuf;

/// Information about a fixed-lock file on disk.
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// The lock file path.
    pub path: PathBuf,

    /// The registry this lock belongs to.
    pub registry: String,

    /// The lock metadata, if the file carried any. Zero-byte markers from
    /// older layouts have none.
    pub metadata: Option<LockMetadata>,

    /// Whether the owning session is presumed dead.
    pub is_stale: bool,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.metadata {
            Some(meta) => write!(
                f,
                "{} (owner: {}, session: {}, age: {}, action: {}{})",
                self.registry,
                meta.owner,
                meta.session,
                meta.age_string(),
                meta.action,
                if self.is_stale { ", STALE" } else { "" }
            ),
            None => write!(
                f,
                "{} (no metadata{})",
                self.registry,
                if self.is_stale { ", STALE" } else { "" }
            ),
        }
    }
}
