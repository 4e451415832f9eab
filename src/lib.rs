//! percia: concurrency and commit-integrity core for a git-backed shared store.
//!
//! Many writers (agents, request handlers) submit operations against one
//! working tree. percia serializes them:
//!
//! - [`locks`]: one global file lock with bounded wait and stale-holder
//!   reclamation based on process liveness
//! - [`queue`]: a durable FIFO admission queue read and written under the lock
//! - [`commit`]: a two-phase commit transaction that either produces exactly
//!   one commit or restores the last known-good state
//! - [`dispatch`]: the loop that ties them together
//!
//! All state lives in `.percia/` at the repository root.

pub mod cli;
pub mod commands;
pub mod commit;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod git;
pub mod locks;
pub mod queue;
pub mod validator;

#[cfg(test)]
mod test_support;
