//! RAII lock guard implementation.

use super::manager::LockManager;
use crate::error::Result;
use std::path::Path;

/// Proof that the global lock is held, released when dropped.
///
/// A guard is only ever constructed after a successful acquire, so dropping
/// one can never release a lock its manager does not own. If release fails
/// during drop, a warning is logged and the program continues.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,

    /// Whether the lock has been released manually.
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub(super) fn new(manager: &'a LockManager) -> Self {
        Self {
            manager,
            released: false,
        }
    }

    /// Path to the lock file this guard holds.
    pub fn path(&self) -> &Path {
        self.manager.lock_path()
    }

    /// The manager that acquired this guard.
    pub fn manager(&self) -> &LockManager {
        self.manager
    }

    /// Release the lock now and observe the result.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.manager.release()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.manager.release()
        {
            tracing::warn!(
                path = %self.manager.lock_path().display(),
                error = %e,
                "failed to release lock"
            );
        }
    }
}
