//! Acquire, release, reclaim, and inspect the global lock.

use super::guard::LockGuard;
use super::liveness::StaleLockDetector;
use super::record::{HolderIdentity, LockRecord};
use crate::context::{LOCK_FILE, StoreContext};
use crate::error::{PerciaError, Result};
use crate::events::{Event, EventAction, record_event};
use crate::fs::create_exclusive;
use fs2::FileExt;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Tunables of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Fixed sleep between attempts.
    pub poll_interval: Duration,
    /// Nominal lifetime written into each record.
    pub timeout_seconds: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout_seconds: 300,
        }
    }
}

/// What the lock file currently says.
#[derive(Debug, Clone)]
pub enum LockStatus {
    /// No lock file.
    Free,
    /// A well-formed record.
    Held {
        record: LockRecord,
        /// Whether the recorded holder is alive.
        alive: bool,
        /// Whether the nominal lifetime has elapsed.
        expired: bool,
    },
    /// The lock file exists but cannot be parsed.
    Corrupt { reason: String },
}

/// Global file lock with bounded-wait acquisition and stale-holder reclamation.
///
/// At most one record exists at a time; its presence is the lock. A manager
/// tracks the token of its own active acquisition so that it can only ever
/// remove the record it created.
#[derive(Debug)]
pub struct LockManager {
    ctx: StoreContext,
    lock_path: PathBuf,
    settings: LockSettings,
    identity: HolderIdentity,
    label: String,
    detector: StaleLockDetector,
    active: Mutex<Option<String>>,
}

impl LockManager {
    /// Manager for the store's lock file, acting as the current process.
    pub fn new(ctx: &StoreContext, settings: LockSettings) -> Self {
        Self {
            ctx: ctx.clone(),
            lock_path: ctx.lock_path(),
            settings,
            identity: HolderIdentity::current(),
            label: String::new(),
            detector: StaleLockDetector::system(),
            active: Mutex::new(None),
        }
    }

    /// Act as a different holder (tests simulate several processes this way).
    pub fn with_identity(mut self, identity: HolderIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Label written into records (e.g. the agent id).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Use a different liveness detector.
    pub fn with_detector(mut self, detector: StaleLockDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn identity(&self) -> HolderIdentity {
        self.identity
    }

    pub fn detector(&self) -> &StaleLockDetector {
        &self.detector
    }

    /// Whether this manager currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.active_slot().is_some()
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Acquire the lock, waiting up to `timeout`.
    ///
    /// A record left by a dead holder is reclaimed; a live holder is waited
    /// for regardless of how long it has held the lock. An unreadable record
    /// is never reclaimed automatically.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The lock is held by this manager
    /// * `Err(PerciaError::LockTimeout)` - Still held by someone else at the deadline
    /// * `Err(PerciaError::UserError)` - This manager already holds the lock
    pub fn acquire(&self, timeout: Duration) -> Result<()> {
        let mut active = self.active_slot();
        if active.is_some() {
            return Err(PerciaError::UserError(format!(
                "lock '{}' is already held by this manager; re-entrant acquisition is not allowed",
                self.lock_path.display()
            )));
        }

        self.ctx.ensure_state_dir()?;
        let deadline = Instant::now() + timeout;
        let mut blocker = String::from("unknown holder");

        loop {
            let record = LockRecord::new(&self.identity, self.settings.timeout_seconds, &self.label);
            if create_exclusive(&self.lock_path, record.to_json()?.as_bytes())? {
                tracing::info!(
                    pid = record.holder_pid,
                    label = %record.label,
                    path = %self.lock_path.display(),
                    "lock acquired"
                );
                *active = Some(record.token);
                return Ok(());
            }

            match LockRecord::read(&self.lock_path) {
                Ok(Some(existing)) => {
                    if !self
                        .detector
                        .is_alive(existing.holder_pid, existing.process_start_time)
                    {
                        tracing::warn!(
                            holder = %existing,
                            "lock holder is dead; reclaiming"
                        );
                        if self.reclaim(&existing)? {
                            continue;
                        }
                    }
                    blocker = existing.to_string();
                }
                // Released between our attempt and the read.
                Ok(None) => continue,
                Err(PerciaError::LockIntegrity(reason)) => {
                    tracing::warn!(%reason, "lock record unreadable; not reclaiming");
                    blocker = format!("unreadable record ({})", reason);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PerciaError::LockTimeout(format!(
                    "could not acquire '{}' within {:?}; held by {}",
                    self.lock_path.display(),
                    timeout,
                    blocker
                )));
            }
            std::thread::sleep(self.settings.poll_interval.min(deadline - now));
        }
    }

    /// Acquire the lock for the lifetime of the returned guard.
    ///
    /// This is the sanctioned way to hold the lock: release happens on every
    /// exit path, and only if acquisition succeeded.
    pub fn scoped_acquire(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        self.acquire(timeout)?;
        Ok(LockGuard::new(self))
    }

    /// Release the lock held by this manager.
    ///
    /// Deletes the record only if it carries this manager's token. Without an
    /// active acquisition nothing is touched and `LockNotHeld` is returned.
    pub fn release(&self) -> Result<()> {
        let mut active = self.active_slot();
        let Some(token) = active.clone() else {
            return Err(PerciaError::LockNotHeld(format!(
                "release of '{}' without a successful acquire",
                self.lock_path.display()
            )));
        };

        match LockRecord::read(&self.lock_path) {
            Ok(Some(record)) if record.token == token => {
                fs::remove_file(&self.lock_path)
                    .map_err(|e| PerciaError::io("release lock", &self.lock_path, e))?;
                *active = None;
                tracing::info!(path = %self.lock_path.display(), "lock released");
                Ok(())
            }
            Ok(Some(record)) => {
                *active = None;
                Err(PerciaError::LockNotHeld(format!(
                    "lock was taken over by {}; leaving it in place",
                    record
                )))
            }
            Ok(None) => {
                *active = None;
                Err(PerciaError::LockNotHeld(
                    "lock record disappeared before release".to_string(),
                ))
            }
            Err(e) => {
                *active = None;
                Err(e)
            }
        }
    }

    /// Remove a dead holder's record.
    ///
    /// Reclaimers serialize on an advisory lock over a sidecar file. Under
    /// it, the record is read again and removed only if it is still the one
    /// judged stale and its holder is still dead. Apart from an operator's
    /// `clear`, nobody else removes a dead holder's record, so it cannot be
    /// replaced between the check and the removal.
    ///
    /// Returns whether the lock path is now free to retry.
    pub(super) fn reclaim(&self, stale: &LockRecord) -> Result<bool> {
        let sidecar = self.reclaim_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&sidecar)
            .map_err(|e| PerciaError::io("open reclaim lock", &sidecar, e))?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| PerciaError::io("take reclaim lock", &sidecar, e))?;

        let current = match LockRecord::read(&self.lock_path) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(true),
            Err(PerciaError::LockIntegrity(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if current.token != stale.token
            || self
                .detector
                .is_alive(current.holder_pid, current.process_start_time)
        {
            tracing::debug!(holder = %current, "lock changed hands before reclamation");
            return Ok(false);
        }

        match fs::remove_file(&self.lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(PerciaError::io("reclaim lock", &self.lock_path, e)),
        }
        drop(file);

        record_event(
            &self.ctx,
            Event::new(EventAction::LockReclaim).with_details(json!({
                "holder_pid": stale.holder_pid,
                "process_start_time": stale.process_start_time,
                "label": stale.label,
                "acquired_at": stale.acquired_at,
            })),
        );
        tracing::info!(holder = %stale, "stale lock reclaimed");
        Ok(true)
    }

    /// `.global.lock.reclaim` next to the lock record. Never deleted.
    fn reclaim_path(&self) -> PathBuf {
        self.lock_path.with_file_name(format!(".{}.reclaim", LOCK_FILE))
    }

    /// Describe the current lock file.
    pub fn status(&self) -> Result<LockStatus> {
        match LockRecord::read(&self.lock_path) {
            Ok(None) => Ok(LockStatus::Free),
            Ok(Some(record)) => {
                let alive = self
                    .detector
                    .is_alive(record.holder_pid, record.process_start_time);
                let expired = record.is_expired();
                Ok(LockStatus::Held {
                    record,
                    alive,
                    expired,
                })
            }
            Err(PerciaError::LockIntegrity(reason)) => Ok(LockStatus::Corrupt { reason }),
            Err(e) => Err(e),
        }
    }

    /// Remove the lock file as an operator.
    ///
    /// A live holder's lock, or an unreadable record, is only removed with
    /// `force`. Returns the removed record when it was readable.
    pub fn clear(&self, force: bool) -> Result<Option<LockRecord>> {
        let removed = match self.status()? {
            LockStatus::Free => return Ok(None),
            LockStatus::Held { alive: true, record, .. } if !force => {
                return Err(PerciaError::UserError(format!(
                    "lock is held by a live process: {}. Use --force to clear it anyway.",
                    record
                )));
            }
            LockStatus::Corrupt { reason } if !force => {
                return Err(PerciaError::LockIntegrity(format!(
                    "{}. Use --force to remove it.",
                    reason
                )));
            }
            LockStatus::Held { record, .. } => Some(record),
            LockStatus::Corrupt { .. } => None,
        };

        fs::remove_file(&self.lock_path)
            .map_err(|e| PerciaError::io("clear lock", &self.lock_path, e))?;

        record_event(
            &self.ctx,
            Event::new(EventAction::LockClear).with_details(json!({
                "force": force,
                "holder_pid": removed.as_ref().map(|r| r.holder_pid),
                "label": removed.as_ref().map(|r| r.label.clone()),
            })),
        );

        Ok(removed)
    }
}
