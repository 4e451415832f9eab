//! Implementation of the `percia queue` command.

use super::{open_queue, open_store};
use crate::error::Result;
use crate::queue::EntryState;

/// Execute the `percia queue` command.
///
/// Lists every entry with its state, oldest first.
pub fn cmd_queue() -> Result<()> {
    let (ctx, config) = open_store()?;
    let queue = open_queue(&ctx, &config, "queue")?;
    let entries = queue.snapshot()?;

    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!(
        "{:>5}  {:11}  {:9}  {:20}  PAYLOAD",
        "ID", "STATE", "KIND", "SUBMITTER"
    );
    for entry in &entries {
        println!(
            "{:>5}  {:11}  {:9}  {:20}  {}",
            entry.entry_id,
            entry.state.to_string(),
            entry.operation_kind.to_string(),
            entry.submitter_id,
            entry.payload_reference
        );
        if let Some(error) = &entry.error {
            println!("       error: {}", error);
        }
        if let Some(commit_ref) = &entry.commit_ref {
            println!("       commit: {}", commit_ref);
        }
    }

    let pending = entries
        .iter()
        .filter(|e| e.state == EntryState::Pending)
        .count();
    println!();
    println!("{} entries, {} pending.", entries.len(), pending);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::EnqueueArgs;
    use crate::commands::cmd_enqueue;
    use crate::context::StoreContext;
    use crate::error::PerciaError;
    use crate::test_support::{DirGuard, create_test_repo};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_queue_lists_without_modifying() {
        let temp_dir = create_test_repo();
        let _guard = DirGuard::new(temp_dir.path());

        cmd_queue().unwrap();

        cmd_enqueue(EnqueueArgs {
            kind: "challenge".to_string(),
            submitter: "agent-2".to_string(),
            payload: "c.json".to_string(),
        })
        .unwrap();
        let ctx = StoreContext::resolve().unwrap();
        let before = std::fs::read_to_string(ctx.queue_path()).unwrap();

        cmd_queue().unwrap();
        assert_eq!(std::fs::read_to_string(ctx.queue_path()).unwrap(), before);
    }

    #[test]
    #[serial]
    fn test_queue_reports_malformed_file() {
        let temp_dir = create_test_repo();
        let _guard = DirGuard::new(temp_dir.path());
        let ctx = StoreContext::resolve().unwrap();
        ctx.ensure_state_dir().unwrap();
        std::fs::write(ctx.queue_path(), "{\"next_id\": ").unwrap();

        let err = cmd_queue().unwrap_err();
        assert!(matches!(err, PerciaError::UserError(_)));
    }
}
