//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for percia.
///
/// This struct represents the contents of `.percia/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Lock settings
    // =========================================================================
    /// How long `acquire` waits for the global lock before giving up.
    #[serde(default = "default_lock_wait_seconds")]
    pub lock_wait_seconds: u64,

    /// Fixed sleep between acquisition attempts, in milliseconds.
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,

    /// Nominal lifetime written into each lock record.
    ///
    /// Informational for operators: a live holder is never preempted and a
    /// dead holder is reclaimed regardless of this value.
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,

    // =========================================================================
    // Commit settings
    // =========================================================================
    /// Prefix of every commit message produced by the dispatcher.
    #[serde(default = "default_commit_message_prefix")]
    pub commit_message_prefix: String,

    /// Glob allow-list for paths that may be staged (relative to the repo root).
    #[serde(default = "default_stageable_globs")]
    pub stageable_globs: Vec<String>,

    // =========================================================================
    // Validator settings
    // =========================================================================
    /// External validator command. When unset the built-in payload checks run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_command: Option<String>,

    /// Maximum payload size accepted by the built-in validator.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// File extensions accepted by the built-in validator (no leading dots).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_wait_seconds: default_lock_wait_seconds(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            commit_message_prefix: default_commit_message_prefix(),
            stageable_globs: default_stageable_globs(),
            validator_command: None,
            max_payload_bytes: default_max_payload_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}
