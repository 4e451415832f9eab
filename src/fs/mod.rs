//! Filesystem primitives for percia state files.
//!
//! Two operations carry all of the crash-consistency guarantees:
//! - [`atomic_write`] replaces a file as a whole (queue, commit state).
//! - [`create_exclusive`] publishes a file only if nothing exists at the
//!   target yet (lock record).

pub mod atomic;

pub use atomic::{atomic_write, atomic_write_file, create_exclusive};
