//! Error types for percia.
//!
//! Uses thiserror for derive macros. The variants follow the failure taxonomy
//! the surrounding application needs to tell apart: "busy, retry later"
//! (`LockTimeout`), "permanently rejected" (`ValidationRejected`,
//! `InputRejected`), and "internal failure, rolled back" (`CommitFailed`).

use crate::exit_codes;
use thiserror::Error;

/// Main error type for percia operations.
#[derive(Error, Debug)]
pub enum PerciaError {
    /// Invalid arguments or an operation that does not apply to the current state.
    #[error("{0}")]
    UserError(String),

    /// The global lock was not acquired before the deadline.
    #[error("lock busy: {0}")]
    LockTimeout(String),

    /// The lock record exists but cannot be read or parsed.
    #[error("lock record unreadable: {0}")]
    LockIntegrity(String),

    /// Release (or re-acquire) attempted without owning the lock.
    #[error("lock not held: {0}")]
    LockNotHeld(String),

    /// An externally supplied identifier, path, or message failed strict validation.
    #[error("input rejected: {0}")]
    InputRejected(String),

    /// The validator refused a payload.
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    /// A queue entry or commit transaction was asked to move backwards or sideways.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// Staging failed; the transaction was rolled back.
    #[error("staging failed: {0}")]
    CommitStagingFailed(String),

    /// The commit (or its rollback) failed.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// A git process exited non-zero or could not be spawned.
    #[error("git operation failed: {0}")]
    GitError(String),

    /// Filesystem failure on one of the state files.
    #[error("{0}")]
    IoError(String),
}

impl PerciaError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            PerciaError::UserError(_)
            | PerciaError::InvalidTransition(_)
            | PerciaError::IoError(_) => exit_codes::USER_ERROR,
            PerciaError::InputRejected(_) | PerciaError::ValidationRejected(_) => {
                exit_codes::REJECTED
            }
            PerciaError::CommitStagingFailed(_)
            | PerciaError::CommitFailed(_)
            | PerciaError::GitError(_) => exit_codes::GIT_FAILURE,
            PerciaError::LockTimeout(_)
            | PerciaError::LockIntegrity(_)
            | PerciaError::LockNotHeld(_) => exit_codes::LOCK_FAILURE,
        }
    }

    /// True when the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PerciaError::LockTimeout(_))
    }

    /// True when retrying the same request can never succeed.
    pub fn is_permanent_rejection(&self) -> bool {
        matches!(
            self,
            PerciaError::ValidationRejected(_) | PerciaError::InputRejected(_)
        )
    }

    /// Build an `IoError` with the offending path in the message.
    pub(crate) fn io(action: &str, path: &std::path::Path, err: std::io::Error) -> Self {
        PerciaError::IoError(format!("failed to {} '{}': {}", action, path.display(), err))
    }
}

/// Result type alias for percia operations.
pub type Result<T> = std::result::Result<T, PerciaError>;
