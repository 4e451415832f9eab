//! Implementation of the `percia enqueue` command.

use super::{open_queue, open_store};
use crate::cli::EnqueueArgs;
use crate::error::Result;
use crate::queue::OperationKind;

/// Execute the `percia enqueue` command.
///
/// Prints the assigned entry id on stdout so scripts can capture it.
pub fn cmd_enqueue(args: EnqueueArgs) -> Result<()> {
    let kind: OperationKind = args.kind.parse()?;
    let (ctx, config) = open_store()?;
    let queue = open_queue(&ctx, &config, "enqueue")?;

    let entry_id = queue.enqueue(kind, &args.submitter, &args.payload)?;
    println!("{}", entry_id);
    Ok(())
}
