//! Event logging subsystem for percia.
//!
//! Append-only audit log of queue and commit activity, stored as NDJSON (one
//! JSON object per line) in `.percia/events/events.ndjson`.
//!
//! # Event Format
//!
//! - `ts`: RFC3339 timestamp
//! - `action`: What happened (enqueue, dequeue, complete, ...)
//! - `actor`: `user@HOST` of the process writing the event
//! - `entry`: Optional queue entry id
//! - `details`: Freeform object with action-specific details
//!
//! Events that describe queue or commit state are appended while the global
//! lock is held, so the log and the state move together.

use crate::context::StoreContext;
use crate::error::{PerciaError, Result};
use crate::locks::get_owner_string;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Entry admitted to the queue
    Enqueue,
    /// Entry moved to in_progress
    Dequeue,
    /// Entry committed
    Complete,
    /// Entry failed (commit failure or abandoned)
    Fail,
    /// Entry refused by the validator
    Reject,
    /// Stale lock taken over from a dead holder
    LockReclaim,
    /// Lock removed by an operator
    LockClear,
    /// Commit transaction rolled back
    Rollback,
    /// Crash recovery of commit state or queue entries
    Recover,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventAction::Enqueue => "enqueue",
            EventAction::Dequeue => "dequeue",
            EventAction::Complete => "complete",
            EventAction::Fail => "fail",
            EventAction::Reject => "reject",
            EventAction::LockReclaim => "lock_reclaim",
            EventAction::LockClear => "lock_clear",
            EventAction::Rollback => "rollback",
            EventAction::Recover => "recover",
        };
        f.write_str(s)
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,

    pub action: EventAction,

    pub actor: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<u64>,

    pub details: Value,
}

impl Event {
    /// Create a new event with the current time and actor.
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: get_owner_string(),
            entry: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the queue entry id for this event.
    pub fn with_entry(mut self, entry_id: u64) -> Self {
        self.entry = Some(entry_id);
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            PerciaError::UserError(format!("failed to serialize event to JSON: {}", e))
        })
    }
}

/// Get the path to the events file.
pub fn events_file_path(ctx: &StoreContext) -> PathBuf {
    ctx.events_dir().join("events.ndjson")
}

/// Append an event to the events log and sync it to disk.
pub fn append_event(ctx: &StoreContext, event: &Event) -> Result<()> {
    let events_file = events_file_path(ctx);
    let json_line = event.to_ndjson_line()?;

    let events_dir = ctx.events_dir();
    if !events_dir.exists() {
        fs::create_dir_all(&events_dir)
            .map_err(|e| PerciaError::io("create events directory", &events_dir, e))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&events_file)
        .map_err(|e| PerciaError::io("open events file", &events_file, e))?;

    writeln!(file, "{}", json_line)
        .map_err(|e| PerciaError::io("write event to", &events_file, e))?;

    file.sync_all()
        .map_err(|e| PerciaError::io("sync events file", &events_file, e))?;

    Ok(())
}

/// Append an event, logging instead of failing.
///
/// Used where the audited state change has already happened and must not be
/// reported as failed just because the log could not be written.
pub fn record_event(ctx: &StoreContext, event: Event) {
    if let Err(e) = append_event(ctx, &event) {
        tracing::warn!(action = %event.action, error = %e, "failed to append audit event");
    }
}

/// Read every event from the log, oldest first.
pub fn read_events(ctx: &StoreContext) -> Result<Vec<Event>> {
    let events_file = events_file_path(ctx);
    let content = match fs::read_to_string(&events_file) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PerciaError::io("read events file", &events_file, e)),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| {
                PerciaError::UserError(format!(
                    "malformed event in '{}': {}",
                    events_file.display(),
                    e
                ))
            })
        })
        .collect()
}
