//! Locking subsystem for jobrepo.
//!
//! One fixed lock file per registry (`sessions/<registry>_fixed_lock`)
//! serializes the critical sections that touch shared state: counter
//! allocation, session lock-set mutations, and session startup bookkeeping.
//! Job-record files are partitioned by ID and never need this lock.
//!
//! # Lock Files
//!
//! Lock files are created with **create_new** semantics (exclusive create) so
//! only one process can hold a given lock at a time. The lock is advisory:
//! correctness on network filesystems rests on conservative staleness windows
//! and bounded retry, not on the filesystem being well behaved.
//!
//! # Lock Metadata
//!
//! Each lock file contains JSON metadata:
//! - `owner`: who acquired the lock (`user@host`)
//! - `pid`: the process ID
//! - `session`: the session name whose liveness marker decides staleness
//! - `created_at`: RFC3339 timestamp
//! - `action`: what the holder was doing (allocate/lock_ids/startup/...)
//!
//! # Crash recovery
//!
//! A lock file whose owning session is dead (liveness marker missing or
//! expired) is *stale*. A stale fixed lock means a session died inside a
//! critical section; acquisition fails hard with an operator remedy unless
//! `reclaim_stale_locks` is enabled in the config.
//!
//! # RAII Guards
//!
//! Locks are managed through RAII guard objects that delete the lock file
//! when dropped. If deletion keeps failing past a bounded retry, a warning is
//! printed and shutdown proceeds rather than hanging.

mod guard;
mod metadata;
mod operations;
mod types;


pub use guard::LockGuard;
pub use metadata::{owner_string, LockMetadata};
pub use operations::{acquire_fixed_lock, clear_lock, is_locked, list_locks};
pub use types::LockInfo;
