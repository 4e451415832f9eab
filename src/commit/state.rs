//! Commit transaction state, persisted after every phase change.

use crate::error::{PerciaError, Result};
use crate::fs::atomic_write_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

/// Phase of a commit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPhase {
    Init,
    Staged,
    Committed,
    RolledBack,
    Failed,
}

impl CommitPhase {
    /// Whether `self -> next` is a forward move of the state machine.
    pub fn can_transition_to(self, next: CommitPhase) -> bool {
        use CommitPhase::*;
        matches!(
            (self, next),
            (Init, Staged)
                | (Init, Failed)
                | (Init, RolledBack)
                | (Staged, Committed)
                | (Staged, RolledBack)
                | (Staged, Failed)
                | (Failed, RolledBack)
        )
    }
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitPhase::Init => "init",
            CommitPhase::Staged => "staged",
            CommitPhase::Committed => "committed",
            CommitPhase::RolledBack => "rolled_back",
            CommitPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One attempted commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitState {
    pub transaction_id: String,

    pub phase: CommitPhase,

    /// Paths handed to the backend's add, relative to the repository root.
    /// Recorded before the add runs.
    #[serde(default)]
    pub staged_paths: BTreeSet<String>,

    /// True once the backend may have been touched and not yet committed.
    /// Rollback restores the staged paths exactly when this is set.
    pub restore_required: bool,

    /// HEAD when the transaction began; the restore target of rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,

    /// Reference produced by a successful commit. Never set before it exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_head: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommitState {
    pub fn new(transaction_id: &str, base_ref: Option<String>) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            phase: CommitPhase::Init,
            staged_paths: BTreeSet::new(),
            restore_required: false,
            base_ref,
            captured_head: None,
            message: None,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// True when nothing is left to do for this transaction.
    ///
    /// A failed transaction that may have touched the backend is not settled
    /// until it has been rolled back.
    pub fn is_settled(&self) -> bool {
        match self.phase {
            CommitPhase::Committed | CommitPhase::RolledBack => true,
            CommitPhase::Failed => !self.restore_required,
            CommitPhase::Init | CommitPhase::Staged => false,
        }
    }

    /// Move to `next`, refusing anything but a forward transition.
    pub fn advance(&mut self, next: CommitPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(PerciaError::InvalidTransition(format!(
                "transaction {} cannot move from {} to {}",
                self.transaction_id, self.phase, next
            )));
        }
        self.phase = next;
        if matches!(next, CommitPhase::Committed | CommitPhase::RolledBack) {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Read the persisted state; `None` when no transaction was ever recorded.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PerciaError::io("read commit state", path, e)),
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            PerciaError::UserError(format!(
                "commit state file '{}' is malformed: {}",
                path.display(),
                e
            ))
        })
    }

    /// Persist atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            PerciaError::UserError(format!("failed to serialize commit state: {}", e))
        })?;
        atomic_write_file(path, &json)
    }
}
