//! The lock record: the on-disk statement of who holds the global lock.

use crate::error::{PerciaError, Result};
use crate::locks::liveness::{ProcessProbe, SystemProbe};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Identity of a process taking part in the lock protocol.
///
/// The start-time fingerprint disambiguates a live holder from an unrelated
/// process that was later assigned the same PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderIdentity {
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
}

impl HolderIdentity {
    /// Identity of the running process.
    pub fn current() -> Self {
        let pid = std::process::id();
        Self {
            pid,
            start_time: SystemProbe.start_time(pid),
        }
    }
}

/// Lock record stored in the lock file.
///
/// Never mutated in place: a record is published whole by an exclusive
/// create and removed whole by release or reclamation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Process ID of the lock holder.
    pub holder_pid: u32,

    /// Start-time fingerprint of the holder (clock ticks since boot on Linux).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_start_time: Option<u64>,

    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,

    /// Nominal lifetime of the lock. A live holder is never preempted.
    pub timeout_seconds: u64,

    /// `user@HOST` of the holder.
    pub owner: String,

    /// Unique per acquisition; release only deletes a record carrying its own token.
    pub token: String,

    /// Free-text label of the writer holding the lock (e.g. an agent id).
    #[serde(default)]
    pub label: String,
}

impl LockRecord {
    /// Create a record for a fresh acquisition attempt by `identity`.
    pub fn new(identity: &HolderIdentity, timeout_seconds: u64, label: &str) -> Self {
        Self {
            holder_pid: identity.pid,
            process_start_time: identity.start_time,
            acquired_at: Utc::now(),
            timeout_seconds,
            owner: get_owner_string(),
            token: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
        }
    }

    /// Read the record at `path`.
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - No lock file (the lock is free)
    /// * `Ok(Some(record))` - A well-formed record
    /// * `Err(PerciaError::LockIntegrity)` - The file exists but is not a valid record
    /// * `Err(PerciaError::IoError)` - The file could not be read
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PerciaError::io("read lock file", path, e)),
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            PerciaError::LockIntegrity(format!(
                "failed to parse lock file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Serialize the record to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            PerciaError::UserError(format!("failed to serialize lock record: {}", e))
        })
    }

    /// Identity of the holder that wrote this record.
    pub fn holder(&self) -> HolderIdentity {
        HolderIdentity {
            pid: self.holder_pid,
            start_time: self.process_start_time,
        }
    }

    /// Time since the lock was acquired.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.acquired_at)
    }

    /// True once the nominal lifetime has elapsed.
    ///
    /// Records are written by other processes, so `timeout_seconds` may hold
    /// any `u64`; values beyond `i64::MAX` never expire.
    pub fn is_expired(&self) -> bool {
        let timeout = i64::try_from(self.timeout_seconds).unwrap_or(i64::MAX);
        self.age().num_seconds() > timeout
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let seconds = age.num_seconds();
        let minutes = age.num_minutes();
        let hours = age.num_hours();

        if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds % 60)
        } else {
            format!("{}s", seconds.max(0))
        }
    }
}

impl std::fmt::Display for LockRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (pid {}, owner {}, held {})",
            if self.label.is_empty() {
                "<unlabelled>"
            } else {
                self.label.as_str()
            },
            self.holder_pid,
            self.owner,
            self.age_string()
        )
    }
}

/// `user@HOST` for the running process.
pub(crate) fn get_owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
