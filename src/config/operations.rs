//! Config loading, validation, and derived settings.

use super::model::Config;
use crate::error::{PerciaError, Result};
use crate::locks::LockSettings;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::time::Duration;

/// Upper bound for the lock wait and lock lifetime settings.
pub const MAX_LOCK_SECONDS: u64 = 365 * 24 * 60 * 60;

impl Config {
    /// Load config from a YAML file.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(PerciaError::UserError)` - Read error, parse error, or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            PerciaError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load config from a YAML file, falling back to defaults when it does not exist.
    ///
    /// A file that exists but fails to parse is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| PerciaError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            PerciaError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values.
    ///
    /// Validation rules:
    /// - lock durations and intervals must be positive
    /// - `commit_message_prefix` must be non-empty
    /// - `stageable_globs` must compile
    /// - `allowed_extensions` entries must be non-empty and have no leading dots
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("lock_wait_seconds", self.lock_wait_seconds),
            ("lock_poll_interval_ms", self.lock_poll_interval_ms),
            ("lock_timeout_seconds", self.lock_timeout_seconds),
            ("max_payload_bytes", self.max_payload_bytes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PerciaError::UserError(format!(
                    "config validation failed: {} must be greater than 0",
                    name
                )));
            }
        }

        let bounded = [
            ("lock_wait_seconds", self.lock_wait_seconds),
            ("lock_timeout_seconds", self.lock_timeout_seconds),
        ];
        for (name, value) in bounded {
            if value > MAX_LOCK_SECONDS {
                return Err(PerciaError::UserError(format!(
                    "config validation failed: {} must be at most {} (one year), got {}",
                    name, MAX_LOCK_SECONDS, value
                )));
            }
        }

        if self.commit_message_prefix.trim().is_empty() {
            return Err(PerciaError::UserError(
                "config validation failed: commit_message_prefix must be non-empty".to_string(),
            ));
        }

        self.stageable_globset()?;

        for ext in &self.allowed_extensions {
            if ext.is_empty() {
                return Err(PerciaError::UserError(
                    "config validation failed: allowed_extensions entries must be non-empty"
                        .to_string(),
                ));
            }
            if ext.starts_with('.') {
                return Err(PerciaError::UserError(format!(
                    "config validation failed: allowed_extensions entries must not have leading dots (found '{}'). Use '{}' instead.",
                    ext,
                    ext.trim_start_matches('.')
                )));
            }
        }

        Ok(())
    }

    /// Default deadline for lock acquisition.
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_seconds)
    }

    /// Lock manager settings derived from this config.
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            poll_interval: Duration::from_millis(self.lock_poll_interval_ms),
            timeout_seconds: self.lock_timeout_seconds,
        }
    }

    /// Compile `stageable_globs` into a matcher.
    pub fn stageable_globset(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.stageable_globs {
            let normalized = pattern.trim().replace('\\', "/");
            if normalized.is_empty() {
                continue;
            }
            let glob = Glob::new(&normalized).map_err(|e| {
                PerciaError::UserError(format!(
                    "config validation failed: invalid stageable glob '{}': {}",
                    pattern, e
                ))
            })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| {
            PerciaError::UserError(format!(
                "config validation failed: invalid stageable globs: {}",
                e
            ))
        })
    }

    /// `allowed_extensions` normalized to lowercase.
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.allowed_extensions
            .iter()
            .map(|s| s.to_lowercase())
            .collect()
    }
}
