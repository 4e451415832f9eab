//! Two-phase commit against the version-control backend.

use super::backend::VcsBackend;
use super::backup::Backup;
use super::state::{CommitPhase, CommitState};
use super::validate::{validate_message, validate_path, validate_ref, validate_transaction_id};
use crate::config::Config;
use crate::context::StoreContext;
use crate::error::{PerciaError, Result};
use crate::events::{Event, EventAction, record_event};
use globset::GlobSet;
use serde_json::json;
use std::sync::Arc;

/// Outcome of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub transaction_id: String,
    /// Reference the transaction's paths were restored to; `None` when
    /// nothing external had to be undone.
    pub restored_to: Option<String>,
}

/// Step of [`CommitCoordinator::execute`] that failed.
#[derive(Debug, Clone, Copy)]
enum Step {
    Stage,
    Commit,
}

/// Drives one commit transaction at a time through
/// `init -> staged -> committed`, or into `rolled_back` / `failed`.
///
/// The coordinator never takes the global lock itself: every method must be
/// called while the caller holds it.
pub struct CommitCoordinator {
    ctx: StoreContext,
    backend: Arc<dyn VcsBackend>,
    stageable: GlobSet,
    state: Option<CommitState>,
}

impl CommitCoordinator {
    /// Create a coordinator, picking up any persisted transaction.
    pub fn new(ctx: &StoreContext, backend: Arc<dyn VcsBackend>, config: &Config) -> Result<Self> {
        Ok(Self {
            ctx: ctx.clone(),
            backend,
            stageable: config.stageable_globset()?,
            state: CommitState::load(ctx.commit_state_path())?,
        })
    }

    /// The current (or most recent) transaction.
    pub fn current(&self) -> Option<&CommitState> {
        self.state.as_ref()
    }

    /// Start a transaction at the current HEAD.
    ///
    /// Refused while the persisted previous transaction is unsettled.
    pub fn begin(&mut self, transaction_id: &str) -> Result<()> {
        validate_transaction_id(transaction_id)?;
        self.reload()?;

        if let Some(previous) = &self.state
            && !previous.is_settled()
        {
            return Err(PerciaError::InvalidTransition(format!(
                "transaction {} is still {}; run recovery before starting {}",
                previous.transaction_id, previous.phase, transaction_id
            )));
        }

        let Some(base) = self.backend.head()? else {
            return Err(PerciaError::UserError(
                "repository has no commits; create an initial commit first".to_string(),
            ));
        };
        let base = validate_ref(&base)?.to_string();

        let state = CommitState::new(transaction_id, Some(base));
        state.save(self.ctx.commit_state_path())?;
        tracing::debug!(transaction = transaction_id, base = ?state.base_ref, "transaction started");
        self.state = Some(state);
        Ok(())
    }

    /// Validate `paths`, back them up, and stage them.
    ///
    /// A path failing validation aborts before the backend is called.
    /// The paths and `restore_required` are persisted before the backend's
    /// add runs, because a failing add may already have modified the index.
    pub fn stage<S: AsRef<str>>(&mut self, paths: &[S]) -> Result<()> {
        let state = self.require_phase(CommitPhase::Init, "stage")?;
        let txn = state.transaction_id.clone();

        let validated = match self.validate_paths(paths) {
            Ok(validated) => validated,
            Err(e) => {
                self.fail(&e.to_string())?;
                return Err(e);
            }
        };

        let backup = Backup::for_transaction(&self.ctx, &txn);
        if let Err(e) = backup.capture(&self.ctx.repo_root, &validated) {
            self.fail(&e.to_string())?;
            return Err(e);
        }

        let path = self.ctx.commit_state_path();
        let state = self.state_mut()?;
        state.staged_paths.extend(validated.iter().cloned());
        state.restore_required = true;
        state.save(&path)?;

        if let Err(e) = self.backend.add(&validated) {
            self.fail(&e.to_string())?;
            return Err(PerciaError::CommitStagingFailed(format!(
                "transaction {}: {}",
                txn, e
            )));
        }

        let state = self.state_mut()?;
        state.advance(CommitPhase::Staged)?;
        state.save(&path)?;
        tracing::debug!(transaction = %txn, paths = state.staged_paths.len(), "paths staged");
        Ok(())
    }

    /// Commit the staged paths and capture the resulting reference.
    pub fn commit(&mut self, message: &str) -> Result<String> {
        let state = self.require_phase(CommitPhase::Staged, "commit")?;
        let txn = state.transaction_id.clone();
        if state.staged_paths.is_empty() || !state.restore_required {
            return Err(PerciaError::InvalidTransition(format!(
                "transaction {} is staged but records no staged paths",
                txn
            )));
        }
        validate_message(message)?;

        let head = match self
            .backend
            .commit(message)
            .and_then(|head| validate_ref(&head).map(str::to_string))
        {
            Ok(head) => head,
            Err(e) => {
                self.fail(&e.to_string())?;
                return Err(PerciaError::CommitFailed(format!(
                    "transaction {}: {}",
                    txn, e
                )));
            }
        };

        let path = self.ctx.commit_state_path();
        let state = self.state_mut()?;
        state.message = Some(message.to_string());
        state.captured_head = Some(head.clone());
        state.restore_required = false;
        state.advance(CommitPhase::Committed)?;
        state.save(&path)?;
        Backup::for_transaction(&self.ctx, &txn).discard();
        tracing::info!(transaction = %txn, head = %head, "transaction committed");
        Ok(head)
    }

    /// Undo the current transaction.
    ///
    /// Only when `restore_required` is set: HEAD goes back to the base
    /// reference, the transaction's own paths are unstaged, and their
    /// backed-up contents are put back. Nothing else in the index or the
    /// working tree is touched.
    pub fn rollback(&mut self) -> Result<RollbackReport> {
        let Some(state) = self.state.as_ref() else {
            return Err(PerciaError::InvalidTransition(
                "no transaction to roll back".to_string(),
            ));
        };
        let txn = state.transaction_id.clone();
        if !state.phase.can_transition_to(CommitPhase::RolledBack) {
            return Err(PerciaError::InvalidTransition(format!(
                "transaction {} is {} and cannot be rolled back",
                txn, state.phase
            )));
        }

        let backup = Backup::for_transaction(&self.ctx, &txn);
        let restored_to = if state.restore_required {
            let paths: Vec<String> = state.staged_paths.iter().cloned().collect();
            let Some(base) = state.base_ref.clone() else {
                self.fail("no base reference to restore")?;
                return Err(PerciaError::CommitFailed(format!(
                    "rollback of transaction {} impossible: no base reference",
                    txn
                )));
            };
            if let Err(e) = self.backend.restore(&base, &paths) {
                self.fail(&format!("rollback failed: {}", e))?;
                return Err(PerciaError::CommitFailed(format!(
                    "rollback of transaction {} failed: {}",
                    txn, e
                )));
            }
            if let Err(e) = backup.restore(&self.ctx.repo_root, &paths) {
                self.fail(&format!("restoring backed-up files failed: {}", e))?;
                return Err(PerciaError::CommitFailed(format!(
                    "rollback of transaction {} could not restore files (kept in '{}'): {}",
                    txn,
                    backup.dir().display(),
                    e
                )));
            }
            Some(base)
        } else {
            None
        };
        backup.discard();

        let path = self.ctx.commit_state_path();
        let state = self.state_mut()?;
        state.restore_required = false;
        state.advance(CommitPhase::RolledBack)?;
        state.save(&path)?;
        let error = state.error.clone();

        tracing::warn!(transaction = %txn, restored_to = ?restored_to, "transaction rolled back");
        record_event(
            &self.ctx,
            Event::new(EventAction::Rollback).with_details(json!({
                "transaction_id": txn,
                "restored_to": restored_to,
                "error": error,
            })),
        );

        Ok(RollbackReport {
            transaction_id: txn,
            restored_to,
        })
    }

    /// Run begin, stage and commit as one unit, rolling back on any failure.
    ///
    /// # Returns
    ///
    /// * `Ok(CommitState)` - The committed transaction
    /// * `Err(PerciaError::InputRejected)` - A path or the message failed validation (rolled back)
    /// * `Err(PerciaError::CommitStagingFailed)` - Staging failed (rolled back)
    /// * `Err(PerciaError::CommitFailed)` - Commit or rollback failed
    pub fn execute<S: AsRef<str>>(
        &mut self,
        transaction_id: &str,
        paths: &[S],
        message: &str,
    ) -> Result<CommitState> {
        self.begin(transaction_id)?;
        let txn = transaction_id.to_string();

        if let Err(cause) = self.stage(paths) {
            return Err(self.abort(&txn, cause, Step::Stage));
        }
        if let Err(cause) = self.commit(message) {
            return Err(self.abort(&txn, cause, Step::Commit));
        }

        self.state
            .clone()
            .ok_or_else(|| PerciaError::CommitFailed(format!("transaction {} vanished", txn)))
    }

    /// Settle a transaction left unfinished by a crashed process.
    ///
    /// Returns `None` when there was nothing to recover.
    pub fn recover(&mut self) -> Result<Option<RollbackReport>> {
        self.reload()?;
        let Some(state) = self.state.as_ref() else {
            return Ok(None);
        };
        if state.is_settled() {
            return Ok(None);
        }
        let txn = state.transaction_id.clone();
        let phase = state.phase;

        let report = if state.restore_required {
            self.rollback()?
        } else {
            self.fail("interrupted before staging")?;
            Backup::for_transaction(&self.ctx, &txn).discard();
            RollbackReport {
                transaction_id: txn.clone(),
                restored_to: None,
            }
        };

        tracing::warn!(transaction = %txn, %phase, "recovered unfinished transaction");
        record_event(
            &self.ctx,
            Event::new(EventAction::Recover).with_details(json!({
                "transaction_id": txn,
                "phase": phase,
                "restored_to": report.restored_to,
            })),
        );
        Ok(Some(report))
    }

    fn abort(&mut self, txn: &str, cause: PerciaError, step: Step) -> PerciaError {
        let outcome = match self.rollback() {
            Ok(RollbackReport {
                restored_to: Some(base),
                ..
            }) => format!("rolled back to {}", base),
            Ok(RollbackReport {
                restored_to: None, ..
            }) => {
                "rolled back; no external changes to undo".to_string()
            }
            Err(e) => {
                tracing::error!(transaction = txn, error = %e, "rollback failed");
                return PerciaError::CommitFailed(format!(
                    "transaction {} failed ({}) and could not be rolled back: {}",
                    txn, cause, e
                ));
            }
        };

        match (cause, step) {
            (PerciaError::InputRejected(msg), _) => {
                PerciaError::InputRejected(format!("transaction {}: {}; {}", txn, msg, outcome))
            }
            (PerciaError::CommitStagingFailed(msg), _) | (PerciaError::CommitFailed(msg), _) => {
                match step {
                    Step::Stage => PerciaError::CommitStagingFailed(format!("{}; {}", msg, outcome)),
                    Step::Commit => PerciaError::CommitFailed(format!("{}; {}", msg, outcome)),
                }
            }
            (other, Step::Stage) => PerciaError::CommitStagingFailed(format!(
                "transaction {}: {}; {}",
                txn, other, outcome
            )),
            (other, Step::Commit) => {
                PerciaError::CommitFailed(format!("transaction {}: {}; {}", txn, other, outcome))
            }
        }
    }

    /// Another process may have run a transaction since this one last looked.
    fn reload(&mut self) -> Result<()> {
        self.state = CommitState::load(self.ctx.commit_state_path())?;
        Ok(())
    }

    fn validate_paths<S: AsRef<str>>(&self, paths: &[S]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Err(PerciaError::InputRejected("nothing to stage".to_string()));
        }
        paths
            .iter()
            .map(|p| validate_path(p.as_ref(), &self.ctx.repo_root, &self.stageable))
            .collect()
    }

    fn require_phase(&self, expected: CommitPhase, action: &str) -> Result<&CommitState> {
        match &self.state {
            Some(state) if state.phase == expected => Ok(state),
            Some(state) => Err(PerciaError::InvalidTransition(format!(
                "cannot {} transaction {} in phase {}",
                action, state.transaction_id, state.phase
            ))),
            None => Err(PerciaError::InvalidTransition(format!(
                "cannot {} without a transaction; call begin first",
                action
            ))),
        }
    }

    fn state_mut(&mut self) -> Result<&mut CommitState> {
        self.state
            .as_mut()
            .ok_or_else(|| PerciaError::InvalidTransition("no active transaction".to_string()))
    }

    /// Mark the transaction failed, keeping `restore_required` as it is.
    fn fail(&mut self, error: &str) -> Result<()> {
        let path = self.ctx.commit_state_path();
        let state = self.state_mut()?;
        if state.phase != CommitPhase::Failed {
            state.advance(CommitPhase::Failed)?;
        }
        state.error = Some(error.to_string());
        state.save(&path)
    }
}

impl std::fmt::Debug for CommitCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitCoordinator")
            .field("repo_root", &self.ctx.repo_root)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
