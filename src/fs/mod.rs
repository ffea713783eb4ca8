//! Filesystem helpers: atomic writes and bounded retry.

mod atomic;
mod retry;

pub use atomic::{atomic_write, atomic_write_file};
pub use retry::RetryPolicy;
