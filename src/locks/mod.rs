//! Global lock for percia.
//!
//! A single lock file (`.percia/global.lock`) serializes every mutation of the
//! shared state: queue, commit transaction, and the repository itself.
//!
//! # Protocol
//!
//! - **Acquire**: a complete record is written to a private temp file and then
//!   hard-linked to the lock path. The link fails if the path exists, so the
//!   record becomes visible atomically and only one writer can win.
//! - **Wait**: a busy lock is polled at a fixed interval until a deadline.
//! - **Reclaim**: a record whose holder is dead (missing PID, zombie, or a PID
//!   now owned by a process with a different start time) is moved aside and
//!   discarded. A live holder is never preempted, however old its record.
//! - **Release**: the record is removed only if it carries the releasing
//!   manager's acquisition token.
//!
//! # Lock Record
//!
//! The lock file contains JSON:
//! - `holder_pid`, `process_start_time`: identity of the holder
//! - `acquired_at`: RFC3339 timestamp
//! - `timeout_seconds`: nominal lifetime (informational)
//! - `owner`: `user@HOST`
//! - `token`: per-acquisition UUID
//! - `label`: free-text writer label
//!
//! # RAII Guards
//!
//! [`LockManager::scoped_acquire`] returns a [`LockGuard`] that releases the
//! lock when dropped. If release fails during drop, a warning is logged but
//! the program does not crash.

mod guard;
mod liveness;
mod manager;
mod record;


pub use guard::LockGuard;
pub use liveness::{ProcessProbe, StaleLockDetector, SystemProbe};
pub use manager::{LockManager, LockSettings, LockStatus};
pub use record::{HolderIdentity, LockRecord};

pub(crate) use record::get_owner_string;
