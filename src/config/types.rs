//! Default value functions for the Config struct.

/// Default time `acquire` waits for the global lock.
pub(crate) fn default_lock_wait_seconds() -> u64 {
    30
}

/// Default fixed backoff between lock attempts.
pub(crate) fn default_lock_poll_interval_ms() -> u64 {
    500
}

/// Default `timeout_seconds` recorded in the lock record.
pub(crate) fn default_lock_timeout_seconds() -> u64 {
    300
}

pub(crate) fn default_commit_message_prefix() -> String {
    "percia".to_string()
}

pub(crate) fn default_stageable_globs() -> Vec<String> {
    vec!["**".to_string()]
}

/// 10 MiB, the payload limit of the built-in validator.
pub(crate) fn default_max_payload_bytes() -> u64 {
    10 * 1024 * 1024
}

pub fn default_allowed_extensions() -> Vec<String> {
    ["json", "md", "txt", "yaml", "yml"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
