//! Queue entry types.

use crate::error::{PerciaError, Result};
use crate::locks::HolderIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a queue entry asks to have committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Proposal,
    Challenge,
    Decision,
    Other,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Proposal => "proposal",
            OperationKind::Challenge => "challenge",
            OperationKind::Decision => "decision",
            OperationKind::Other => "other",
        };
        f.write_str(s)
    }
}

impl FromStr for OperationKind {
    type Err = PerciaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "proposal" => Ok(OperationKind::Proposal),
            "challenge" => Ok(OperationKind::Challenge),
            "decision" => Ok(OperationKind::Decision),
            "other" => Ok(OperationKind::Other),
            other => Err(PerciaError::UserError(format!(
                "unknown operation kind '{}'. Expected one of: proposal, challenge, decision, other",
                other
            ))),
        }
    }
}

/// Processing state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryState::Completed | EntryState::Failed)
    }

    /// States only move forward; terminal states never change.
    pub fn can_transition_to(self, next: EntryState) -> bool {
        matches!(
            (self, next),
            (EntryState::Pending, EntryState::InProgress)
                | (EntryState::Pending, EntryState::Failed)
                | (EntryState::InProgress, EntryState::Completed)
                | (EntryState::InProgress, EntryState::Failed)
        )
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryState::Pending => "pending",
            EntryState::InProgress => "in_progress",
            EntryState::Completed => "completed",
            EntryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One unit of work submitted by a writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Assigned from the queue's counter; defines processing order.
    pub entry_id: u64,

    pub submitter_id: String,

    pub operation_kind: OperationKind,

    /// Path of the staged content, relative to the repository root.
    pub payload_reference: String,

    pub state: EntryState,

    pub submitted_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Process that moved the entry to `in_progress`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<HolderIdentity>,

    /// Commit produced for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_ref: Option<String>,
}

impl QueueEntry {
    pub(crate) fn new(
        entry_id: u64,
        operation_kind: OperationKind,
        submitter_id: &str,
        payload_reference: &str,
    ) -> Self {
        Self {
            entry_id,
            submitter_id: submitter_id.to_string(),
            operation_kind,
            payload_reference: payload_reference.to_string(),
            state: EntryState::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
            error: None,
            claimed_by: None,
            commit_ref: None,
        }
    }

    /// Apply a state change, refusing regressions.
    pub(crate) fn transition(&mut self, next: EntryState, error: Option<String>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(PerciaError::InvalidTransition(format!(
                "entry {} cannot move from {} to {}",
                self.entry_id, self.state, next
            )));
        }
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        if error.is_some() {
            self.error = error;
        }
        Ok(())
    }
}
