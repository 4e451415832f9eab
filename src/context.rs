//! Repository and state-directory resolution for percia.
//!
//! Finds the Git repository root from any working directory and derives the
//! fixed, well-known paths of every shared state file. All components locate
//! their files through this module so that every process targets the same
//! lock record and queue.

use crate::config::Config;
use crate::error::{PerciaError, Result};
use crate::git;
use std::env;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// State directory relative to the repository root.
pub const STATE_DIR: &str = ".percia";

/// Lock record file name.
pub const LOCK_FILE: &str = "global.lock";

/// Queue state file name.
pub const QUEUE_FILE: &str = "queue.json";

/// Persisted commit transaction file name.
pub const COMMIT_STATE_FILE: &str = "commit_state.json";

/// Resolved paths for one percia store. All paths are absolute.
#[derive(Debug, Clone)]
pub struct StoreContext {
    /// Root of the Git working tree that holds the shared state.
    pub repo_root: PathBuf,

    /// `{repo_root}/.percia/`
    pub state_dir: PathBuf,
}

impl StoreContext {
    /// Resolve the store from the current working directory.
    pub fn resolve() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| {
            PerciaError::UserError(format!("failed to get current working directory: {}", e))
        })?;

        Self::resolve_from(&cwd)
    }

    /// Resolve the store from a directory anywhere inside the repository.
    pub fn resolve_from<P: AsRef<Path>>(cwd: P) -> Result<Self> {
        let repo_root = git::get_repo_root(cwd)?;
        Ok(Self::at(repo_root))
    }

    /// Build a context rooted at a known directory without consulting git.
    pub fn at<P: Into<PathBuf>>(repo_root: P) -> Self {
        let repo_root = repo_root.into();
        let state_dir = repo_root.join(STATE_DIR);
        Self {
            repo_root,
            state_dir,
        }
    }

    /// Path to the lock record.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Path to the queue file.
    pub fn queue_path(&self) -> PathBuf {
        self.state_dir.join(QUEUE_FILE)
    }

    /// Path to the persisted commit transaction.
    pub fn commit_state_path(&self) -> PathBuf {
        self.state_dir.join(COMMIT_STATE_FILE)
    }

    /// Per-transaction copies of staged files.
    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    /// Directory holding the audit log.
    pub fn events_dir(&self) -> PathBuf {
        self.state_dir.join("events")
    }

    /// Path to the optional config file.
    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    /// Load the config for this store (defaults when the file is absent).
    pub fn load_config(&self) -> Result<Config> {
        Config::load_or_default(self.config_path())
    }

    /// Create the state directory if needed and keep it out of `git status`.
    pub fn ensure_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)
            .map_err(|e| PerciaError::io("create state directory", &self.state_dir, e))?;

        if let Err(e) = self.exclude_state_dir() {
            tracing::warn!(error = %e, "failed to add state directory to git exclude");
        }
        Ok(())
    }

    /// Append `/.percia/` to `.git/info/exclude` unless it is already listed.
    ///
    /// Only a plain `.git` directory is touched; linked worktrees and
    /// submodules keep their exclude file elsewhere.
    fn exclude_state_dir(&self) -> Result<()> {
        let git_dir = self.repo_root.join(".git");
        if !git_dir.is_dir() {
            return Ok(());
        }

        let info_dir = git_dir.join("info");
        let exclude = info_dir.join("exclude");
        let existing = match std::fs::read_to_string(&exclude) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(PerciaError::io("read git exclude file", &exclude, e)),
        };

        let listed = existing
            .lines()
            .any(|line| line.trim().trim_matches('/') == STATE_DIR);
        if listed {
            return Ok(());
        }

        std::fs::create_dir_all(&info_dir)
            .map_err(|e| PerciaError::io("create git info directory", &info_dir, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&exclude)
            .map_err(|e| PerciaError::io("open git exclude file", &exclude, e))?;

        let separator = if existing.is_empty() || existing.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        writeln!(file, "{}/{}/", separator, STATE_DIR)
            .map_err(|e| PerciaError::io("write git exclude file", &exclude, e))?;
        tracing::debug!(path = %exclude.display(), "state directory excluded from git");
        Ok(())
    }
}
