//! Implementation of the `percia lock` subcommands.

use super::{lock_manager, open_store};
use crate::cli::LockClearArgs;
use crate::error::Result;
use crate::locks::{LockRecord, LockStatus};

/// Execute `percia lock status`.
pub fn cmd_lock_status() -> Result<()> {
    let (ctx, config) = open_store()?;
    let manager = lock_manager(&ctx, &config, "lock-status");

    match manager.status()? {
        LockStatus::Free => println!("Lock is free."),
        LockStatus::Held {
            record,
            alive,
            expired,
        } => {
            println!("Lock is held:");
            print_record(&record);
            let state = match (alive, expired) {
                (true, false) => "active",
                (true, true) => "active (past its timeout, never preempted while alive)",
                (false, _) => "STALE (holder is dead; the next acquire reclaims it)",
            };
            println!("  Status:     {}", state);
        }
        LockStatus::Corrupt { reason } => {
            println!("Lock record is unreadable: {}", reason);
            println!("It is never reclaimed automatically. Inspect it, then run:");
            println!("  percia lock clear --force");
        }
    }
    println!("  Path:       {}", manager.lock_path().display());
    Ok(())
}

/// Execute `percia lock clear`.
pub fn cmd_lock_clear(args: LockClearArgs) -> Result<()> {
    let (ctx, config) = open_store()?;
    let manager = lock_manager(&ctx, &config, "lock-clear");

    let existed = ctx.lock_path().exists();
    match manager.clear(args.force)? {
        None if existed => println!("Cleared unreadable lock record."),
        None => println!("Lock is free; nothing to clear."),
        Some(record) => {
            println!("Cleared lock:");
            print_record(&record);
        }
    }
    Ok(())
}

fn print_record(record: &LockRecord) {
    println!("  Owner:      {}", record.owner);
    println!("  PID:        {}", record.holder_pid);
    println!(
        "  Acquired:   {}",
        record.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Age:        {}", record.age_string());
    println!("  Timeout:    {}s", record.timeout_seconds);
    if !record.label.is_empty() {
        println!("  Label:      {}", record.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StoreContext;
    use crate::error::PerciaError;
    use crate::locks::HolderIdentity;
    use crate::test_support::{DirGuard, create_test_repo};
    use serial_test::serial;

    fn plant(ctx: &StoreContext, content: &str) {
        ctx.ensure_state_dir().unwrap();
        std::fs::write(ctx.lock_path(), content).unwrap();
    }

    #[test]
    #[serial]
    fn test_lock_status_free_and_held() {
        let temp_dir = create_test_repo();
        let _guard = DirGuard::new(temp_dir.path());
        cmd_lock_status().unwrap();

        let ctx = StoreContext::resolve().unwrap();
        let record = LockRecord::new(&HolderIdentity::current(), 300, "test");
        plant(&ctx, &record.to_json().unwrap());
        cmd_lock_status().unwrap();

        plant(&ctx, "garbage");
        cmd_lock_status().unwrap();
    }

    #[test]
    #[serial]
    fn test_lock_clear_requires_force_for_live_holder() {
        let temp_dir = create_test_repo();
        let _guard = DirGuard::new(temp_dir.path());
        let ctx = StoreContext::resolve().unwrap();

        // This test process is alive.
        let record = LockRecord::new(&HolderIdentity::current(), 300, "test");
        plant(&ctx, &record.to_json().unwrap());

        let err = cmd_lock_clear(LockClearArgs { force: false }).unwrap_err();
        assert!(matches!(err, PerciaError::UserError(_)));
        assert!(ctx.lock_path().exists());

        cmd_lock_clear(LockClearArgs { force: true }).unwrap();
        assert!(!ctx.lock_path().exists());
    }

    #[test]
    #[serial]
    fn test_lock_clear_corrupt_record() {
        let temp_dir = create_test_repo();
        let _guard = DirGuard::new(temp_dir.path());
        let ctx = StoreContext::resolve().unwrap();
        plant(&ctx, "{");

        let err = cmd_lock_clear(LockClearArgs { force: false }).unwrap_err();
        assert!(matches!(err, PerciaError::LockIntegrity(_)));

        cmd_lock_clear(LockClearArgs { force: true }).unwrap();
        assert!(!ctx.lock_path().exists());
    }
}
