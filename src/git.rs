//! Git command runner for percia.
//!
//! Every git invocation in the crate goes through [`run_git`]. Commands are
//! spawned directly (never through a shell) and every argument is screened
//! for control characters and shell metacharacters before the process starts.

use crate::error::{PerciaError, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Characters that are never allowed in an argument handed to git.
pub const FORBIDDEN_ARG_CHARS: &[char] = &['\0', '\n', '\r', '|', ';', '&', '$', '`', '<', '>'];

/// Result of a successful git command execution.
#[derive(Debug, Clone)]
pub struct GitOutput {
    /// Standard output from the command (trimmed).
    pub stdout: String,
    /// Standard error from the command (trimmed).
    pub stderr: String,
}

impl GitOutput {
    fn from_output(output: &Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Returns true if stdout is empty.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty()
    }
}

/// Reject an argument that contains a forbidden character.
pub fn screen_arg(arg: &str) -> Result<()> {
    if let Some(c) = arg.chars().find(|c| FORBIDDEN_ARG_CHARS.contains(c)) {
        return Err(PerciaError::InputRejected(format!(
            "forbidden character {:?} in git argument '{}'",
            c,
            arg.escape_debug()
        )));
    }
    Ok(())
}

/// Run a git command with the specified working directory.
///
/// # Returns
///
/// * `Ok(GitOutput)` - On successful execution (exit code 0)
/// * `Err(PerciaError::InputRejected)` - An argument failed screening; nothing was spawned
/// * `Err(PerciaError::GitError)` - On spawn failure or non-zero exit code
pub fn run_git<P: AsRef<Path>>(cwd: P, args: &[&str]) -> Result<GitOutput> {
    for arg in args {
        screen_arg(arg)?;
    }

    let cwd = cwd.as_ref();
    tracing::debug!(cwd = %cwd.display(), args = ?args, "running git");

    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .output()
        .map_err(|e| {
            PerciaError::GitError(format!(
                "failed to execute git {}: {}",
                args.first().unwrap_or(&""),
                e
            ))
        })?;

    let git_output = GitOutput::from_output(&output);

    if output.status.success() {
        Ok(git_output)
    } else {
        let exit_code = output.status.code().unwrap_or(-1);
        let error_msg = if git_output.stderr.is_empty() {
            git_output.stdout.clone()
        } else {
            git_output.stderr.clone()
        };

        Err(PerciaError::GitError(format!(
            "git {} failed (exit code {}): {}",
            args.first().unwrap_or(&""),
            exit_code,
            error_msg
        )))
    }
}

/// Get the repository root directory using `git rev-parse --show-toplevel`.
///
/// Returns a `UserError` (not a `GitError`) when `cwd` is outside any repository,
/// so "wrong directory" is reported as a usage problem.
pub fn get_repo_root<P: AsRef<Path>>(cwd: P) -> Result<PathBuf> {
    let cwd = cwd.as_ref();

    let output = Command::new("git")
        .current_dir(cwd)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .map_err(|e| {
            PerciaError::UserError(format!("failed to execute git: {} (is git installed?)", e))
        })?;

    let git_output = GitOutput::from_output(&output);

    if output.status.success() {
        Ok(PathBuf::from(&git_output.stdout))
    } else if git_output.stderr.contains("not a git repository")
        || git_output.stderr.contains("fatal:")
    {
        Err(PerciaError::UserError(
            "not inside a git repository. Run this command from within a git repository."
                .to_string(),
        ))
    } else {
        Err(PerciaError::UserError(format!(
            "git command failed: {}",
            git_output.stderr
        )))
    }
}

/// Resolve `HEAD` to a commit hash, or `None` on an unborn branch.
pub fn head_commit<P: AsRef<Path>>(cwd: P) -> Result<Option<String>> {
    match run_git(cwd, &["rev-parse", "--verify", "--quiet", "HEAD"]) {
        Ok(output) if !output.is_empty() => Ok(Some(output.stdout)),
        Ok(_) => Ok(None),
        Err(PerciaError::GitError(msg)) if msg.contains("(exit code 1)") => Ok(None),
        Err(e) => Err(e),
    }
}
