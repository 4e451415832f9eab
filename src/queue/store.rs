//! The admission queue and its file.

use super::entry::{EntryState, OperationKind, QueueEntry};
use crate::commit::validate::{validate_path, validate_submitter_id};
use crate::config::Config;
use crate::context::StoreContext;
use crate::error::{PerciaError, Result};
use crate::events::{Event, EventAction, record_event};
use crate::fs::atomic_write_file;
use crate::locks::{LockGuard, LockManager};
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Contents of `queue.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueFile {
    /// Next id to hand out. Ids are never reused.
    pub next_id: u64,

    #[serde(default)]
    pub entries: Vec<QueueEntry>,
}

impl Default for QueueFile {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }
}

impl QueueFile {
    /// Load the queue; a missing file is an empty queue.
    ///
    /// A file that exists but does not parse is an error, never an empty queue.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(PerciaError::io("read queue file", path, e)),
        };

        serde_json::from_str(&content).map_err(|e| {
            PerciaError::UserError(format!(
                "queue file '{}' is malformed: {}. Fix or remove it manually.",
                path.display(),
                e
            ))
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PerciaError::UserError(format!("failed to serialize queue: {}", e)))?;
        atomic_write_file(path, &json)
    }

    fn entry_mut(&mut self, entry_id: u64) -> Result<&mut QueueEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or_else(|| PerciaError::UserError(format!("queue entry {} not found", entry_id)))
    }
}

/// Durable FIFO queue of pending operations.
///
/// Every operation is a read-modify-write of `queue.json` under the global
/// lock. The plain methods take the lock themselves; the `_locked` variants
/// run inside a critical section the caller already holds.
#[derive(Debug)]
pub struct AdmissionQueue {
    ctx: StoreContext,
    lock: Arc<LockManager>,
    wait: Duration,
    stageable: GlobSet,
}

impl AdmissionQueue {
    pub fn new(ctx: &StoreContext, lock: Arc<LockManager>, config: &Config) -> Result<Self> {
        Ok(Self {
            ctx: ctx.clone(),
            lock,
            wait: config.lock_wait(),
            stageable: config.stageable_globset()?,
        })
    }

    /// Override how long operations wait for the lock.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn lock(&self) -> &Arc<LockManager> {
        &self.lock
    }

    /// Append an entry and return its id.
    ///
    /// Identifiers are validated before the lock is taken.
    pub fn enqueue(
        &self,
        kind: OperationKind,
        submitter_id: &str,
        payload_reference: &str,
    ) -> Result<u64> {
        let payload = self.validate_submission(submitter_id, payload_reference)?;
        let guard = self.lock.scoped_acquire(self.wait)?;
        self.append(&guard, kind, submitter_id, &payload)
    }

    pub fn enqueue_locked(
        &self,
        guard: &LockGuard<'_>,
        kind: OperationKind,
        submitter_id: &str,
        payload_reference: &str,
    ) -> Result<u64> {
        let payload = self.validate_submission(submitter_id, payload_reference)?;
        self.append(guard, kind, submitter_id, &payload)
    }

    /// Claim the lowest-id pending entry, moving it to `in_progress`.
    pub fn dequeue_next(&self) -> Result<Option<QueueEntry>> {
        let guard = self.lock.scoped_acquire(self.wait)?;
        self.dequeue_next_locked(&guard)
    }

    pub fn dequeue_next_locked(&self, guard: &LockGuard<'_>) -> Result<Option<QueueEntry>> {
        self.check_guard(guard)?;
        let mut queue = self.load()?;

        let Some(entry) = queue
            .entries
            .iter_mut()
            .filter(|e| e.state == EntryState::Pending)
            .min_by_key(|e| e.entry_id)
        else {
            return Ok(None);
        };

        entry.transition(EntryState::InProgress, None)?;
        entry.claimed_by = Some(self.lock.identity());
        let claimed = entry.clone();
        self.save(&queue)?;

        tracing::info!(entry = claimed.entry_id, kind = %claimed.operation_kind, "entry dequeued");
        record_event(
            &self.ctx,
            Event::new(EventAction::Dequeue)
                .with_entry(claimed.entry_id)
                .with_details(json!({ "claimed_by": claimed.claimed_by })),
        );
        Ok(Some(claimed))
    }

    /// Move an entry to `state`, recording `error` when given.
    pub fn mark(&self, entry_id: u64, state: EntryState, error: Option<String>) -> Result<QueueEntry> {
        let guard = self.lock.scoped_acquire(self.wait)?;
        self.mark_locked(&guard, entry_id, state, error)
    }

    pub fn mark_locked(
        &self,
        guard: &LockGuard<'_>,
        entry_id: u64,
        state: EntryState,
        error: Option<String>,
    ) -> Result<QueueEntry> {
        self.update_locked(guard, entry_id, state, error, None)
    }

    /// Mark an in-progress entry completed with the commit it produced.
    pub fn complete_locked(
        &self,
        guard: &LockGuard<'_>,
        entry_id: u64,
        commit_ref: &str,
    ) -> Result<QueueEntry> {
        self.update_locked(
            guard,
            entry_id,
            EntryState::Completed,
            None,
            Some(commit_ref.to_string()),
        )
    }

    /// All entries in id order.
    pub fn snapshot(&self) -> Result<Vec<QueueEntry>> {
        let guard = self.lock.scoped_acquire(self.wait)?;
        self.entries_locked(&guard)
    }

    pub fn entries_locked(&self, guard: &LockGuard<'_>) -> Result<Vec<QueueEntry>> {
        self.check_guard(guard)?;
        let mut entries = self.load()?.entries;
        entries.sort_by_key(|e| e.entry_id);
        Ok(entries)
    }

    /// Fail every `in_progress` entry whose claimant is no longer alive.
    ///
    /// Returns the ids of the entries that were failed.
    pub fn recover_abandoned(&self) -> Result<Vec<u64>> {
        let guard = self.lock.scoped_acquire(self.wait)?;
        self.recover_abandoned_locked(&guard)
    }

    pub fn recover_abandoned_locked(&self, guard: &LockGuard<'_>) -> Result<Vec<u64>> {
        self.check_guard(guard)?;
        let mut queue = self.load()?;
        let detector = self.lock.detector();

        let mut recovered = Vec::new();
        for entry in queue
            .entries
            .iter_mut()
            .filter(|e| e.state == EntryState::InProgress)
        {
            let alive = entry
                .claimed_by
                .is_some_and(|who| detector.is_alive(who.pid, who.start_time));
            if alive {
                continue;
            }
            entry.transition(
                EntryState::Failed,
                Some("abandoned by crashed dispatcher".to_string()),
            )?;
            recovered.push(entry.entry_id);
        }

        if recovered.is_empty() {
            return Ok(recovered);
        }
        self.save(&queue)?;

        for id in &recovered {
            tracing::warn!(entry = id, "abandoned entry marked failed");
            record_event(
                &self.ctx,
                Event::new(EventAction::Recover)
                    .with_entry(*id)
                    .with_details(json!({ "error": "abandoned by crashed dispatcher" })),
            );
        }
        Ok(recovered)
    }

    fn append(
        &self,
        guard: &LockGuard<'_>,
        kind: OperationKind,
        submitter_id: &str,
        payload_reference: &str,
    ) -> Result<u64> {
        self.check_guard(guard)?;
        let mut queue = self.load()?;

        let entry_id = queue.next_id;
        queue.next_id += 1;
        queue
            .entries
            .push(QueueEntry::new(entry_id, kind, submitter_id, payload_reference));
        self.save(&queue)?;

        tracing::info!(entry = entry_id, %kind, submitter = submitter_id, "entry enqueued");
        record_event(
            &self.ctx,
            Event::new(EventAction::Enqueue)
                .with_entry(entry_id)
                .with_details(json!({
                    "kind": kind,
                    "submitter": submitter_id,
                    "payload": payload_reference,
                })),
        );
        Ok(entry_id)
    }

    fn update_locked(
        &self,
        guard: &LockGuard<'_>,
        entry_id: u64,
        state: EntryState,
        error: Option<String>,
        commit_ref: Option<String>,
    ) -> Result<QueueEntry> {
        self.check_guard(guard)?;
        let mut queue = self.load()?;

        let entry = queue.entry_mut(entry_id)?;
        entry.transition(state, error)?;
        if commit_ref.is_some() {
            entry.commit_ref = commit_ref;
        }
        let updated = entry.clone();
        self.save(&queue)?;

        let action = match state {
            EntryState::Completed => Some(EventAction::Complete),
            EntryState::Failed => Some(EventAction::Fail),
            EntryState::InProgress => Some(EventAction::Dequeue),
            EntryState::Pending => None,
        };
        if let Some(action) = action {
            record_event(
                &self.ctx,
                Event::new(action).with_entry(entry_id).with_details(json!({
                    "error": updated.error,
                    "commit_ref": updated.commit_ref,
                })),
            );
        }
        tracing::info!(entry = entry_id, %state, "entry updated");
        Ok(updated)
    }

    fn validate_submission(&self, submitter_id: &str, payload_reference: &str) -> Result<String> {
        validate_submitter_id(submitter_id)?;
        validate_path(payload_reference, &self.ctx.repo_root, &self.stageable)
    }

    /// The guard must come from this queue's own lock manager and still hold.
    fn check_guard(&self, guard: &LockGuard<'_>) -> Result<()> {
        if !std::ptr::eq(guard.manager(), Arc::as_ptr(&self.lock)) {
            return Err(PerciaError::LockNotHeld(format!(
                "guard for '{}' does not belong to this queue's lock",
                guard.path().display()
            )));
        }
        if !guard.manager().is_held() {
            return Err(PerciaError::LockNotHeld(
                "queue lock was lost before the operation".to_string(),
            ));
        }
        Ok(())
    }

    fn load(&self) -> Result<QueueFile> {
        QueueFile::load(self.ctx.queue_path())
    }

    fn save(&self, queue: &QueueFile) -> Result<()> {
        queue.save(self.ctx.queue_path())
    }
}
