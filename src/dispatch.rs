//! Dispatcher: takes queue entries in order and commits them.
//!
//! One lock hold covers the whole pop -> validate -> commit -> mark sequence,
//! so the queue and the repository always move together.

use crate::commit::{CommitCoordinator, CommitPhase, GitBackend, RollbackReport, VcsBackend};
use crate::config::Config;
use crate::context::StoreContext;
use crate::error::Result;
use crate::events::{Event, EventAction, record_event};
use crate::locks::{LockGuard, LockManager};
use crate::queue::{AdmissionQueue, EntryState, QueueEntry};
use crate::validator::{self, Validator};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// What happened to one dispatched entry.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Committed; `head` is the new commit.
    Completed { entry_id: u64, head: String },
    /// Refused by the validator. Permanent.
    Rejected { entry_id: u64, reason: String },
    /// The commit transaction failed. `rolled_back` tells whether the
    /// transaction ended rolled back (as opposed to needing recovery).
    Failed {
        entry_id: u64,
        error: String,
        rolled_back: bool,
    },
}

impl DispatchOutcome {
    pub fn entry_id(&self) -> u64 {
        match self {
            DispatchOutcome::Completed { entry_id, .. }
            | DispatchOutcome::Rejected { entry_id, .. }
            | DispatchOutcome::Failed { entry_id, .. } => *entry_id,
        }
    }
}

/// What crash recovery found and settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// The interrupted transaction, if one was settled.
    pub transaction: Option<RollbackReport>,
    /// Entry whose commit landed but was never marked completed.
    pub completed: Option<u64>,
    /// Entries failed because their dispatcher died.
    pub abandoned: Vec<u64>,
}

impl Recovery {
    pub fn is_empty(&self) -> bool {
        self.transaction.is_none() && self.completed.is_none() && self.abandoned.is_empty()
    }
}

/// Transaction id for a queue entry: `txn-<entry_id>-<8 hex>`.
pub fn transaction_id(entry_id: u64) -> String {
    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!("txn-{}-{}", entry_id, &unique[..8])
}

/// Entry id encoded by [`transaction_id`].
pub fn entry_id_of(transaction_id: &str) -> Option<u64> {
    let rest = transaction_id.strip_prefix("txn-")?;
    let (id, _) = rest.split_once('-')?;
    id.parse().ok()
}

pub struct Dispatcher {
    ctx: StoreContext,
    queue: AdmissionQueue,
    coordinator: CommitCoordinator,
    validator: Box<dyn Validator>,
    message_prefix: String,
    wait: Duration,
}

impl Dispatcher {
    pub fn new(
        ctx: &StoreContext,
        queue: AdmissionQueue,
        coordinator: CommitCoordinator,
        validator: Box<dyn Validator>,
        config: &Config,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            queue,
            coordinator,
            validator,
            message_prefix: config.commit_message_prefix.clone(),
            wait: config.lock_wait(),
        }
    }

    /// Dispatcher for a store, committing with git and validating per config.
    pub fn open(ctx: &StoreContext, config: &Config) -> Result<Self> {
        let lock = Arc::new(LockManager::new(ctx, config.lock_settings()).with_label("dispatcher"));
        let queue = AdmissionQueue::new(ctx, lock, config)?;
        let backend: Arc<dyn VcsBackend> = Arc::new(GitBackend::new(&ctx.repo_root));
        let coordinator = CommitCoordinator::new(ctx, backend, config)?;
        let validator = validator::from_config(ctx, config);
        Ok(Self::new(ctx, queue, coordinator, validator, config))
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn coordinator(&self) -> &CommitCoordinator {
        &self.coordinator
    }

    /// Process the next pending entry, if any.
    ///
    /// Before taking an entry, a crashed transaction is recovered and entries
    /// abandoned by dead dispatchers are failed.
    pub fn dispatch_next(&mut self) -> Result<Option<DispatchOutcome>> {
        let lock = self.queue.lock().clone();
        let guard = lock.scoped_acquire(self.wait)?;

        self.recover_locked(&guard)?;

        let Some(entry) = self.queue.dequeue_next_locked(&guard)? else {
            return Ok(None);
        };

        let outcome = self.process(&guard, &entry)?;
        drop(guard);
        Ok(Some(outcome))
    }

    /// Run crash recovery on its own, without taking an entry.
    pub fn recover(&mut self) -> Result<Recovery> {
        let lock = self.queue.lock().clone();
        let guard = lock.scoped_acquire(self.wait)?;
        self.recover_locked(&guard)
    }

    fn recover_locked(&mut self, guard: &LockGuard<'_>) -> Result<Recovery> {
        let transaction = self.coordinator.recover()?;
        let completed = self.complete_committed_locked(guard)?;
        let abandoned = self.queue.recover_abandoned_locked(guard)?;
        Ok(Recovery {
            transaction,
            completed,
            abandoned,
        })
    }

    /// Complete the entry of the last transaction if it committed but the
    /// queue still shows it `in_progress`.
    ///
    /// An entry is dispatched within a single lock hold, so under the lock an
    /// `in_progress` entry is left over no matter whether its claimant lives.
    fn complete_committed_locked(&self, guard: &LockGuard<'_>) -> Result<Option<u64>> {
        let Some(state) = self.coordinator.current() else {
            return Ok(None);
        };
        if state.phase != CommitPhase::Committed {
            return Ok(None);
        }
        let (Some(entry_id), Some(head)) =
            (entry_id_of(&state.transaction_id), state.captured_head.clone())
        else {
            return Ok(None);
        };
        let txn = state.transaction_id.clone();

        let pending = self
            .queue
            .entries_locked(guard)?
            .iter()
            .any(|e| e.entry_id == entry_id && e.state == EntryState::InProgress);
        if !pending {
            return Ok(None);
        }

        self.queue.complete_locked(guard, entry_id, &head)?;
        tracing::warn!(entry = entry_id, transaction = %txn, %head, "committed entry marked completed");
        record_event(
            &self.ctx,
            Event::new(EventAction::Recover)
                .with_entry(entry_id)
                .with_details(json!({
                    "transaction_id": txn,
                    "commit_ref": head,
                })),
        );
        Ok(Some(entry_id))
    }

    /// Dispatch until no pending entry is left, or `limit` entries were handled.
    pub fn drain(&mut self, limit: Option<usize>) -> Result<Vec<DispatchOutcome>> {
        let mut outcomes = Vec::new();
        while limit.is_none_or(|limit| outcomes.len() < limit) {
            match self.dispatch_next()? {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        Ok(outcomes)
    }

    fn process(&mut self, guard: &LockGuard<'_>, entry: &QueueEntry) -> Result<DispatchOutcome> {
        let entry_id = entry.entry_id;

        let verdict = self
            .validator
            .validate(&entry.payload_reference, entry.operation_kind);
        if !verdict.accepted {
            tracing::warn!(entry = entry_id, reason = %verdict.reason, "entry rejected by validator");
            record_event(
                &self.ctx,
                Event::new(EventAction::Reject)
                    .with_entry(entry_id)
                    .with_details(json!({
                        "reason": verdict.reason,
                        "confidence": verdict.confidence,
                    })),
            );
            self.queue.mark_locked(
                guard,
                entry_id,
                EntryState::Failed,
                Some(format!("rejected: {}", verdict.reason)),
            )?;
            return Ok(DispatchOutcome::Rejected {
                entry_id,
                reason: verdict.reason,
            });
        }

        let txn = transaction_id(entry_id);
        let message = format!(
            "{}: {} #{} from {}",
            self.message_prefix, entry.operation_kind, entry_id, entry.submitter_id
        );

        match self
            .coordinator
            .execute(&txn, &[entry.payload_reference.as_str()], &message)
        {
            Ok(state) => {
                let head = state.captured_head.unwrap_or_default();
                self.queue.complete_locked(guard, entry_id, &head)?;
                tracing::info!(entry = entry_id, transaction = %txn, %head, "entry committed");
                Ok(DispatchOutcome::Completed { entry_id, head })
            }
            Err(e) => {
                let rolled_back = self
                    .coordinator
                    .current()
                    .is_some_and(|s| s.transaction_id == txn && s.phase == CommitPhase::RolledBack);
                let error = e.to_string();
                tracing::error!(entry = entry_id, transaction = %txn, %error, rolled_back, "entry failed");
                self.queue
                    .mark_locked(guard, entry_id, EntryState::Failed, Some(error.clone()))?;
                Ok(DispatchOutcome::Failed {
                    entry_id,
                    error,
                    rolled_back,
                })
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue", &self.queue)
            .field("coordinator", &self.coordinator)
            .field("message_prefix", &self.message_prefix)
            .finish_non_exhaustive()
    }
}
