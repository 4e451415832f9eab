//! Implementation of the `percia dispatch` command.

use super::open_store;
use crate::cli::DispatchArgs;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::{PerciaError, Result};

/// Execute the `percia dispatch` command.
///
/// A single dispatch reports a rejected or failed entry through the exit
/// code. With `--all` / `--limit` every outcome is printed and the command
/// succeeds as long as the queue itself could be processed.
pub fn cmd_dispatch(args: DispatchArgs) -> Result<()> {
    let (ctx, config) = open_store()?;
    let mut dispatcher = Dispatcher::open(&ctx, &config)?;

    if !args.all && args.limit.is_none() {
        let Some(outcome) = dispatcher.dispatch_next()? else {
            println!("Queue is empty.");
            return Ok(());
        };
        print_outcome(&outcome);
        return match outcome {
            DispatchOutcome::Completed { .. } => Ok(()),
            DispatchOutcome::Rejected { entry_id, reason } => Err(
                PerciaError::ValidationRejected(format!("entry {}: {}", entry_id, reason)),
            ),
            DispatchOutcome::Failed {
                entry_id, error, ..
            } => Err(PerciaError::CommitFailed(format!(
                "entry {}: {}",
                entry_id, error
            ))),
        };
    }

    let outcomes = dispatcher.drain(args.limit)?;
    if outcomes.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for outcome in &outcomes {
        print_outcome(outcome);
    }

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, DispatchOutcome::Completed { .. }))
        .count();
    println!();
    println!(
        "Dispatched {} entr{}: {} completed, {} not applied.",
        outcomes.len(),
        if outcomes.len() == 1 { "y" } else { "ies" },
        completed,
        outcomes.len() - completed
    );
    Ok(())
}

fn print_outcome(outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Completed { entry_id, head } => {
            println!("#{} completed ({})", entry_id, &head[..head.len().min(12)]);
        }
        DispatchOutcome::Rejected { entry_id, reason } => {
            println!("#{} rejected: {}", entry_id, reason);
        }
        DispatchOutcome::Failed {
            entry_id,
            error,
            rolled_back,
        } => {
            let note = if *rolled_back {
                "rolled back"
            } else {
                "recovery pending"
            };
            println!("#{} failed ({}): {}", entry_id, note, error);
        }
    }
}
