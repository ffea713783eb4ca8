//! Exit code constants for the jobrepo CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid state)
//! - 2: Repository failure (corruption, fatal filesystem errors)
//! - 3: Read-only repository (internal services disabled)
//! - 4: Lock acquisition failure

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or invalid repository state.
pub const USER_ERROR: i32 = 1;

/// Repository failure: corrupt counter file, stale fixed lock at startup,
/// or a filesystem error that risks corrupting the store.
pub const REPOSITORY_FAILURE: i32 = 2;

/// Read-only repository: a mutation was attempted while internal services
/// are disabled.
pub const READ_ONLY: i32 = 3;

/// Lock acquisition failure: the fixed lock is held by another live session.
pub const LOCK_FAILURE: i32 = 4;
