//! Working-tree copies of a transaction's files, taken before staging.
//!
//! Rollback restores these after the index has been reset, so a failed
//! transaction leaves its payload exactly as the submitter wrote it.

use crate::context::StoreContext;
use crate::error::{PerciaError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// `.percia/backups/<transaction_id>/`, mirroring the repository layout.
#[derive(Debug, Clone)]
pub(crate) struct Backup {
    dir: PathBuf,
}

impl Backup {
    pub(crate) fn for_transaction(ctx: &StoreContext, transaction_id: &str) -> Self {
        Self {
            dir: ctx.backups_dir().join(transaction_id),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy every existing path into the backup. Missing paths are skipped.
    ///
    /// `paths` must already be validated (relative, inside the repository).
    pub(crate) fn capture(&self, repo_root: &Path, paths: &[String]) -> Result<usize> {
        let mut copied = 0;
        for path in paths {
            let source = repo_root.join(path);
            if !source.is_file() {
                continue;
            }
            let target = self.dir.join(path);
            create_parent(&target)?;
            fs::copy(&source, &target).map_err(|e| PerciaError::io("back up", &source, e))?;
            copied += 1;
        }
        tracing::debug!(dir = %self.dir.display(), files = copied, "backup captured");
        Ok(copied)
    }

    /// Put backed-up contents back into the working tree.
    ///
    /// Files whose content already matches are not rewritten. Paths that had
    /// no backup are left as they are.
    pub(crate) fn restore<'a, I>(&self, repo_root: &Path, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut restored = 0;
        for path in paths {
            let saved = self.dir.join(path);
            let content = match fs::read(&saved) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(PerciaError::io("read backup", &saved, e)),
            };

            let target = repo_root.join(path);
            if fs::read(&target).is_ok_and(|current| current == content) {
                continue;
            }
            create_parent(&target)?;
            fs::copy(&saved, &target).map_err(|e| PerciaError::io("restore", &target, e))?;
            restored += 1;
        }
        Ok(restored)
    }

    /// Remove the backup. Best-effort.
    pub(crate) fn discard(&self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to remove backup")
            }
        }
    }
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| PerciaError::io("create directory", parent, e)),
        _ => Ok(()),
    }
}
