//! Commit coordination for percia.
//!
//! Makes "stage these paths, then commit" behave as one unit with respect to
//! the repository: either a new commit exists and the transaction is
//! `committed`, or HEAD is back at the transaction's base reference with the
//! transaction's paths unstaged and their contents as they were before
//! staging. Rollback never touches paths outside the transaction.
//!
//! The transaction is persisted to `.percia/commit_state.json` after every
//! phase change so a later process can finish a crashed one
//! ([`CommitCoordinator::recover`]).

mod backend;
mod backup;
mod coordinator;
mod state;
pub mod validate;


pub use backend::{GitBackend, VcsBackend};
pub use coordinator::{CommitCoordinator, RollbackReport};
pub use state::{CommitPhase, CommitState};
