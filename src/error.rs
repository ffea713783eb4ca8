//! Error types for the jobrepo CLI and library modules.
//!
//! Uses thiserror for derive macros and provides user-actionable error messages.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for jobrepo operations.
///
/// Each variant maps to a specific exit code. `Repository` errors are fatal
/// and operator-visible; `ReadOnly` errors are recoverable once the user
/// fixes the underlying cause and re-enables services.
#[derive(Error, Debug)]
pub enum RepoError {
    /// User provided invalid arguments or the repository is in an invalid state.
    #[error("{0}")]
    UserError(String),

    /// Fatal repository error: corrupt counter, unexpected lock file at
    /// startup, or a filesystem failure that risks corrupting the store.
    #[error("Repository error: {0}")]
    Repository(String),

    /// A mutation was attempted while internal services are disabled.
    #[error("Repository is read-only: {0}")]
    ReadOnly(String),

    /// Lock could not be acquired.
    #[error("Lock acquisition failed: {0}")]
    Lock(String),
}

impl RepoError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            RepoError::UserError(_) => exit_codes::USER_ERROR,
            RepoError::Repository(_) => exit_codes::REPOSITORY_FAILURE,
            RepoError::ReadOnly(_) => exit_codes::READ_ONLY,
            RepoError::Lock(_) => exit_codes::LOCK_FAILURE,
        }
    }
}

/// Result type alias for jobrepo operations.
pub type Result<T> = std::result::Result<T, RepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_error_has_correct_exit_code() {
        let err = RepoError::UserError("bad argument".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    }

    #[test]
    fn repository_error_has_correct_exit_code() {
        let err = RepoError::Repository("corrupt counter".to_string());
        assert_eq!(err.exit_code(), exit_codes::REPOSITORY_FAILURE);
    }

    #[test]
    fn read_only_error_has_correct_exit_code() {
        let err = RepoError::ReadOnly("services disabled".to_string());
        assert_eq!(err.exit_code(), exit_codes::READ_ONLY);
    }

    #[test]
    fn lock_error_has_correct_exit_code() {
        let err = RepoError::Lock("fixed lock held".to_string());
        assert_eq!(err.exit_code(), exit_codes::LOCK_FAILURE);
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = RepoError::ReadOnly("Internal services disabled".to_string());
        assert_eq!(
            err.to_string(),
            "Repository is read-only: Internal services disabled"
        );

        let err = RepoError::Repository("counter file is corrupt".to_string());
        assert_eq!(err.to_string(), "Repository error: counter file is corrupt");
    }
}
