//! Version-control backend used by the commit coordinator.

use super::validate::validate_ref;
use crate::error::Result;
use crate::git::{head_commit, run_git};
use std::path::PathBuf;

/// The external operations a commit transaction needs.
///
/// Implementations only report success or failure; callers validate every
/// input before it gets here.
pub trait VcsBackend: Send + Sync {
    /// Current commit reference, `None` on an unborn branch.
    fn head(&self) -> Result<Option<String>>;

    /// Stage `paths` (already validated, relative to the repository root).
    fn add(&self, paths: &[String]) -> Result<()>;

    /// Commit the index and return the new reference.
    fn commit(&self, message: &str) -> Result<String>;

    /// Undo a transaction: move HEAD back to `reference` if it moved, and
    /// reset the index entries of `paths` to their state at `reference`.
    ///
    /// The working tree and every other index entry are left alone.
    fn restore(&self, reference: &str, paths: &[String]) -> Result<()>;
}

/// Backend that runs the `git` CLI in a repository.
#[derive(Debug, Clone)]
pub struct GitBackend {
    repo_root: PathBuf,
}

impl GitBackend {
    pub fn new<P: Into<PathBuf>>(repo_root: P) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }
}

impl VcsBackend for GitBackend {
    fn head(&self) -> Result<Option<String>> {
        match head_commit(&self.repo_root)? {
            Some(head) => Ok(Some(validate_ref(&head)?.to_string())),
            None => Ok(None),
        }
    }

    fn add(&self, paths: &[String]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        run_git(&self.repo_root, &args)?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String> {
        run_git(&self.repo_root, &["commit", "--no-verify", "-m", message])?;
        let head = run_git(&self.repo_root, &["rev-parse", "HEAD"])?;
        Ok(validate_ref(&head.stdout)?.to_string())
    }

    fn restore(&self, reference: &str, paths: &[String]) -> Result<()> {
        let reference = validate_ref(reference)?;

        if head_commit(&self.repo_root)?.as_deref() != Some(reference) {
            run_git(&self.repo_root, &["reset", "--soft", "--quiet", reference])?;
        }
        if paths.is_empty() {
            return Ok(());
        }

        let mut args = vec!["reset", "--quiet", reference, "--"];
        args.extend(paths.iter().map(String::as_str));
        run_git(&self.repo_root, &args)?;
        Ok(())
    }
}
