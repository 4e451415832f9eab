//! Exit code constants for the percia CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid state)
//! - 2: Rejected input or payload (permanent, do not retry)
//! - 3: Git or commit failure (rolled back)
//! - 4: Lock busy or lock record unreadable (retry later)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid state transition, or I/O trouble.
pub const USER_ERROR: i32 = 1;

/// Permanent rejection: the validator or strict input validation refused the request.
pub const REJECTED: i32 = 2;

/// Git operation or commit transaction failure.
pub const GIT_FAILURE: i32 = 3;

/// The global lock could not be acquired or its record is unreadable.
pub const LOCK_FAILURE: i32 = 4;
