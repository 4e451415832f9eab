//! Implementation of the `percia recover` command.

use super::open_store;
use crate::dispatch::Dispatcher;
use crate::error::Result;

/// Execute the `percia recover` command.
///
/// Settles a commit transaction interrupted by a crash (unstaging its paths
/// when the index may have been touched), completes entries whose commit
/// landed before the crash, and fails queue entries whose dispatcher died. Dispatch runs the same recovery before every entry; this
/// command lets an operator run it on demand.
pub fn cmd_recover() -> Result<()> {
    let (ctx, config) = open_store()?;
    let mut dispatcher = Dispatcher::open(&ctx, &config)?;
    let recovery = dispatcher.recover()?;

    if recovery.is_empty() {
        println!("Nothing to recover.");
        return Ok(());
    }

    if let Some(report) = &recovery.transaction {
        match &report.restored_to {
            Some(base) => println!(
                "Rolled back transaction {} (restored to {}).",
                report.transaction_id, base
            ),
            None => println!(
                "Marked transaction {} failed (no changes to undo).",
                report.transaction_id
            ),
        }
    }
    if let Some(entry_id) = recovery.completed {
        println!("Entry #{} was committed before a crash; marked completed.", entry_id);
    }
    for entry_id in &recovery.abandoned {
        println!("Entry #{} was abandoned by a crashed dispatcher; marked failed.", entry_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{CommitPhase, CommitState};
    use crate::context::StoreContext;
    use crate::test_support::{DirGuard, create_test_repo, git};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_recover_nothing() {
        let temp_dir = create_test_repo();
        let _guard = DirGuard::new(temp_dir.path());
        cmd_recover().unwrap();
    }

    #[test]
    #[serial]
    fn test_recover_unstages_staged_transaction() {
        let temp_dir = create_test_repo();
        let _guard = DirGuard::new(temp_dir.path());
        let ctx = StoreContext::resolve().unwrap();
        let base = git(temp_dir.path(), &["rev-parse", "HEAD"]);

        // Simulate a dispatcher that died between add and commit.
        std::fs::write(temp_dir.path().join("half.json"), "{}").unwrap();
        git(temp_dir.path(), &["add", "half.json"]);
        let mut state = CommitState::new("txn-1-0badf00d", Some(base.clone()));
        state.phase = CommitPhase::Staged;
        state.restore_required = true;
        state.staged_paths.insert("half.json".to_string());
        ctx.ensure_state_dir().unwrap();
        state.save(ctx.commit_state_path()).unwrap();

        cmd_recover().unwrap();

        let settled = CommitState::load(ctx.commit_state_path()).unwrap().unwrap();
        assert_eq!(settled.phase, CommitPhase::RolledBack);
        assert!(!settled.restore_required);
        assert_eq!(git(temp_dir.path(), &["rev-parse", "HEAD"]), base);
        assert_eq!(git(temp_dir.path(), &["diff", "--cached", "--name-only"]), "");
        assert!(temp_dir.path().join("half.json").exists());
    }
}
