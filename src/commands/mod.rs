//! Command implementations for percia.
//!
//! Routes CLI commands to their handlers. Every handler resolves the store
//! from the current working directory.

mod dispatch;
mod enqueue;
mod lock;
mod queue;
mod recover;

use crate::cli::{Command, LockAction, LockCommand};
use crate::config::Config;
use crate::context::StoreContext;
use crate::error::Result;
use crate::locks::LockManager;
use crate::queue::AdmissionQueue;
use std::sync::Arc;

pub use dispatch::cmd_dispatch;
pub use enqueue::cmd_enqueue;
pub use lock::{cmd_lock_clear, cmd_lock_status};
pub use queue::cmd_queue;
pub use recover::cmd_recover;

/// Dispatch a command to its implementation.
pub fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Enqueue(args) => cmd_enqueue(args),
        Command::Dispatch(args) => cmd_dispatch(args),
        Command::Queue => cmd_queue(),
        Command::Lock(lock_cmd) => dispatch_lock(lock_cmd),
        Command::Recover => cmd_recover(),
    }
}

fn dispatch_lock(lock_cmd: LockCommand) -> Result<()> {
    match lock_cmd.action {
        LockAction::Status => cmd_lock_status(),
        LockAction::Clear(args) => cmd_lock_clear(args),
    }
}

/// Resolve the store and its config from the working directory.
fn open_store() -> Result<(StoreContext, Config)> {
    let ctx = StoreContext::resolve()?;
    let config = ctx.load_config()?;
    Ok((ctx, config))
}

/// Lock manager labelled with the command holding it.
fn lock_manager(ctx: &StoreContext, config: &Config, label: &str) -> Arc<LockManager> {
    Arc::new(LockManager::new(ctx, config.lock_settings()).with_label(label))
}

fn open_queue(ctx: &StoreContext, config: &Config, label: &str) -> Result<AdmissionQueue> {
    AdmissionQueue::new(ctx, lock_manager(ctx, config, label), config)
}
