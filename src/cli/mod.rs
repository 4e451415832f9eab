//! CLI argument parsing for percia.
//!
//! Uses clap derive macros for declarative argument definitions.
//! Implementations live in the `commands` module.

use clap::{Parser, Subcommand};

/// percia: serialized admission and atomic commits for a git-backed shared store.
///
/// Writers enqueue operations; a dispatcher applies them one at a time under
/// a global file lock, committing each to git or rolling it back.
#[derive(Parser, Debug)]
#[command(name = "percia")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for percia.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Admit an operation to the queue.
    ///
    /// Prints the assigned entry id.
    Enqueue(EnqueueArgs),

    /// Process pending queue entries.
    ///
    /// Without flags, handles the next entry only.
    Dispatch(DispatchArgs),

    /// List queue entries.
    Queue,

    /// Lock management commands.
    Lock(LockCommand),

    /// Settle an interrupted commit and fail abandoned entries.
    Recover,
}

/// Arguments for the `enqueue` command.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Operation kind (proposal, challenge, decision, other).
    #[arg(short, long, default_value = "other")]
    pub kind: String,

    /// Identifier of the submitting agent.
    #[arg(short, long)]
    pub submitter: String,

    /// Payload path, relative to the repository root.
    pub payload: String,
}

/// Arguments for the `dispatch` command.
#[derive(Parser, Debug)]
pub struct DispatchArgs {
    /// Keep dispatching until no pending entry is left.
    #[arg(long)]
    pub all: bool,

    /// Dispatch at most this many entries (implies --all).
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Show the current holder of the global lock.
    Status,

    /// Remove the lock record.
    ///
    /// Refuses to remove a live holder's lock without --force.
    Clear(LockClearArgs),
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Clear even if the holder looks alive or the record is unreadable.
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_enqueue() {
        let cli = Cli::try_parse_from([
            "percia",
            "enqueue",
            "--kind",
            "decision",
            "--submitter",
            "agent-7",
            "state/d.json",
        ])
        .unwrap();
        if let Command::Enqueue(args) = cli.command {
            assert_eq!(args.kind, "decision");
            assert_eq!(args.submitter, "agent-7");
            assert_eq!(args.payload, "state/d.json");
        } else {
            panic!("Expected Enqueue command");
        }
    }

    #[test]
    fn parse_enqueue_requires_submitter() {
        assert!(Cli::try_parse_from(["percia", "enqueue", "p.json"]).is_err());
    }

    #[test]
    fn parse_dispatch_flags() {
        let cli = Cli::try_parse_from(["percia", "dispatch"]).unwrap();
        if let Command::Dispatch(args) = cli.command {
            assert!(!args.all);
            assert!(args.limit.is_none());
        } else {
            panic!("Expected Dispatch command");
        }

        let cli = Cli::try_parse_from(["percia", "dispatch", "--all", "--limit", "5"]).unwrap();
        if let Command::Dispatch(args) = cli.command {
            assert!(args.all);
            assert_eq!(args.limit, Some(5));
        } else {
            panic!("Expected Dispatch command");
        }
    }

    #[test]
    fn parse_lock_commands() {
        let cli = Cli::try_parse_from(["percia", "lock", "status"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Lock(LockCommand {
                action: LockAction::Status
            })
        ));

        let cli = Cli::try_parse_from(["percia", "lock", "clear", "--force"]).unwrap();
        if let Command::Lock(LockCommand {
            action: LockAction::Clear(args),
        }) = cli.command
        {
            assert!(args.force);
        } else {
            panic!("Expected Lock Clear command");
        }
    }

    #[test]
    fn parse_queue_and_recover() {
        assert!(matches!(
            Cli::try_parse_from(["percia", "queue"]).unwrap().command,
            Command::Queue
        ));
        assert!(matches!(
            Cli::try_parse_from(["percia", "recover"]).unwrap().command,
            Command::Recover
        ));
    }
}
