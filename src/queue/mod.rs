//! Admission queue for percia.
//!
//! Writers append entries; a dispatcher takes them in strictly increasing
//! `entry_id` order. The queue lives in `.percia/queue.json` as
//! `{ "next_id": N, "entries": [...] }` and is only read or written while the
//! global lock is held. There is no unlocked read.

mod entry;
mod store;

#[cfg(test)]
mod tests;

pub use entry::{EntryState, OperationKind, QueueEntry};
pub use store::{AdmissionQueue, QueueFile};
