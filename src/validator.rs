//! Payload validation consulted by the dispatcher before committing.
//!
//! A [`Validator`] is a predicate: it never fails, it returns a [`Verdict`].
//! Anything that prevents a decision (missing file, command not found, ...)
//! is a rejection.

use crate::config::Config;
use crate::context::StoreContext;
use crate::queue::OperationKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Maximum characters of validator output kept in a rejection reason.
const MAX_REASON_CHARS: usize = 2048;

/// Maximum lines of validator output kept in a rejection reason.
const MAX_REASON_LINES: usize = 20;

/// Decision of a validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub accepted: bool,

    #[serde(default)]
    pub reason: String,

    /// How sure the validator is, from 0.0 to 1.0.
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

impl Verdict {
    pub fn accept(reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
            confidence: 1.0,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            confidence: 1.0,
        }
    }
}

/// Decides whether a payload may be committed.
pub trait Validator: Send + Sync {
    fn validate(&self, payload_reference: &str, kind: OperationKind) -> Verdict;
}

/// Build the validator configured for a store.
pub fn from_config(ctx: &StoreContext, config: &Config) -> Box<dyn Validator> {
    match config.validator_command.as_deref().map(str::trim) {
        Some(command) if !command.is_empty() => {
            Box::new(CommandValidator::new(command, &ctx.repo_root))
        }
        _ => Box::new(PayloadValidator::from_config(&ctx.repo_root, config)),
    }
}

// ============================================================================
// Built-in checks
// ============================================================================

/// File-level checks on the payload.
///
/// The payload must resolve (following symlinks) to a regular file inside the
/// repository, be no larger than `max_bytes`, carry an allowed extension, and
/// parse when it is JSON.
#[derive(Debug, Clone)]
pub struct PayloadValidator {
    repo_root: PathBuf,
    max_bytes: u64,
    extensions: Vec<String>,
}

impl PayloadValidator {
    pub fn from_config(repo_root: &Path, config: &Config) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            max_bytes: config.max_payload_bytes,
            extensions: config.normalized_extensions(),
        }
    }

    fn check(&self, payload_reference: &str) -> Result<String, String> {
        let root = self
            .repo_root
            .canonicalize()
            .map_err(|e| format!("cannot resolve repository root: {}", e))?;
        let resolved = root
            .join(payload_reference)
            .canonicalize()
            .map_err(|e| format!("payload '{}' not found: {}", payload_reference, e))?;

        if !resolved.starts_with(&root) {
            return Err(format!(
                "payload '{}' resolves outside the repository",
                payload_reference
            ));
        }

        let metadata = std::fs::metadata(&resolved)
            .map_err(|e| format!("cannot stat payload '{}': {}", payload_reference, e))?;
        if !metadata.is_file() {
            return Err(format!("payload '{}' is not a regular file", payload_reference));
        }
        if metadata.len() > self.max_bytes {
            return Err(format!(
                "payload '{}' is {} bytes (maximum {})",
                payload_reference,
                metadata.len(),
                self.max_bytes
            ));
        }

        let extension = resolved
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !self.extensions.contains(&extension) {
            return Err(format!(
                "extension '{}' not allowed (allowed: {})",
                extension,
                self.extensions.join(", ")
            ));
        }

        if extension == "json" {
            let content = std::fs::read_to_string(&resolved)
                .map_err(|e| format!("cannot read payload '{}': {}", payload_reference, e))?;
            serde_json::from_str::<serde_json::Value>(&content)
                .map_err(|e| format!("payload '{}' is not valid JSON: {}", payload_reference, e))?;
        }

        Ok(format!("{} bytes, .{}", metadata.len(), extension))
    }
}

impl Validator for PayloadValidator {
    fn validate(&self, payload_reference: &str, _kind: OperationKind) -> Verdict {
        match self.check(payload_reference) {
            Ok(summary) => Verdict::accept(summary),
            Err(reason) => Verdict::reject(reason),
        }
    }
}

// ============================================================================
// External command
// ============================================================================

/// Runs an external command as `<command...> <payload_reference> <kind>`.
///
/// The command is split with shell quoting rules but never run through a
/// shell. Exit status 0 accepts. If stdout is a JSON verdict it is used as is.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    command: String,
    cwd: PathBuf,
}

impl CommandValidator {
    pub fn new(command: &str, cwd: &Path) -> Self {
        Self {
            command: command.trim().to_string(),
            cwd: cwd.to_path_buf(),
        }
    }
}

impl Validator for CommandValidator {
    fn validate(&self, payload_reference: &str, kind: OperationKind) -> Verdict {
        let args = match shell_words::split(&self.command) {
            Ok(args) if !args.is_empty() => args,
            Ok(_) => return Verdict::reject("validator command is empty"),
            Err(e) => {
                return Verdict::reject(format!(
                    "failed to parse validator command: {}\nCommand: {}",
                    e, self.command
                ));
            }
        };

        let output = match Command::new(&args[0])
            .args(&args[1..])
            .arg(payload_reference)
            .arg(kind.to_string())
            .current_dir(&self.cwd)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                return Verdict::reject(format!(
                    "failed to execute validator: {}\nCommand: {}",
                    e, self.command
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if let Ok(verdict) = serde_json::from_str::<Verdict>(&stdout) {
            return verdict;
        }

        if output.status.success() {
            return Verdict::accept(truncate_output(&stdout, MAX_REASON_LINES, MAX_REASON_CHARS));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let combined = if stderr.is_empty() {
            stdout
        } else {
            format!("{}\n{}", stdout, stderr)
        };
        Verdict::reject(format!(
            "validator exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            truncate_output(combined.trim(), MAX_REASON_LINES, MAX_REASON_CHARS)
        ))
    }
}

fn truncate_output(output: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    let relevant_lines: Vec<&str> = if lines.len() > max_lines {
        lines[lines.len() - max_lines..].to_vec()
    } else {
        lines
    };

    let mut result = relevant_lines.join("\n");

    if result.len() > max_chars {
        let mut cut = result.len() - max_chars;
        while !result.is_char_boundary(cut) {
            cut += 1;
        }
        result = format!("...(truncated)...\n{}", &result[cut..]);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn payload_validator(root: &Path) -> PayloadValidator {
        PayloadValidator::from_config(root, &Config::default())
    }

    #[test]
    fn accepts_valid_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("p.json"), "{\"claim\": true}").unwrap();

        let verdict = payload_validator(temp.path()).validate("p.json", OperationKind::Proposal);
        assert!(verdict.accepted, "{}", verdict.reason);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn rejects_invalid_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("p.json"), "{oops").unwrap();

        let verdict = payload_validator(temp.path()).validate("p.json", OperationKind::Proposal);
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("not valid JSON"));
    }

    #[test]
    fn rejects_missing_directory_and_extension() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("dir.json")).unwrap();
        std::fs::write(temp.path().join("run.sh"), "echo").unwrap();
        let validator = payload_validator(temp.path());

        assert!(!validator.validate("missing.json", OperationKind::Other).accepted);
        assert!(!validator.validate("dir.json", OperationKind::Other).accepted);
        let verdict = validator.validate("run.sh", OperationKind::Other);
        assert!(verdict.reason.contains("extension 'sh'"));
    }

    #[test]
    fn rejects_oversized_payload() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("big.txt"), "x".repeat(64)).unwrap();
        let config = Config {
            max_payload_bytes: 16,
            ..Config::default()
        };

        let verdict = PayloadValidator::from_config(temp.path(), &config)
            .validate("big.txt", OperationKind::Decision);
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("maximum 16"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_repository() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.json"), "{}").unwrap();
        let temp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.json"),
            temp.path().join("link.json"),
        )
        .unwrap();

        let verdict = payload_validator(temp.path()).validate("link.json", OperationKind::Other);
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("outside the repository"));
    }

    #[cfg(unix)]
    #[test]
    fn command_exit_status_decides() {
        let temp = TempDir::new().unwrap();
        let accept = CommandValidator::new("true", temp.path());
        let reject = CommandValidator::new("false", temp.path());

        assert!(accept.validate("p.json", OperationKind::Proposal).accepted);
        assert!(!reject.validate("p.json", OperationKind::Proposal).accepted);
    }

    #[cfg(unix)]
    #[test]
    fn command_receives_payload_and_kind() {
        let temp = TempDir::new().unwrap();
        let validator = CommandValidator::new("echo checked", temp.path());

        let verdict = validator.validate("state/p.json", OperationKind::Challenge);
        assert!(verdict.accepted);
        assert_eq!(verdict.reason, "checked state/p.json challenge");
    }

    #[cfg(unix)]
    #[test]
    fn command_json_verdict_is_used() {
        let temp = TempDir::new().unwrap();
        let validator = CommandValidator::new(
            r#"sh -c 'echo "{\"accepted\": false, \"reason\": \"schema\", \"confidence\": 0.4}"' --"#,
            temp.path(),
        );

        let verdict = validator.validate("p.json", OperationKind::Proposal);
        assert!(!verdict.accepted);
        assert_eq!(verdict.reason, "schema");
        assert_eq!(verdict.confidence, 0.4);
    }

    #[test]
    fn unparseable_or_missing_command_rejects() {
        let temp = TempDir::new().unwrap();
        let unbalanced = CommandValidator::new("check 'oops", temp.path());
        assert!(!unbalanced.validate("p.json", OperationKind::Other).accepted);

        let missing = CommandValidator::new("definitely-not-a-real-binary-xyz", temp.path());
        let verdict = missing.validate("p.json", OperationKind::Other);
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("failed to execute"));
    }

    #[test]
    fn from_config_picks_command_when_set() {
        let temp = TempDir::new().unwrap();
        let ctx = StoreContext::at(temp.path());
        std::fs::write(temp.path().join("p.json"), "{}").unwrap();

        let builtin = from_config(&ctx, &Config::default());
        assert!(builtin.validate("p.json", OperationKind::Other).accepted);

        let config = Config {
            validator_command: Some("definitely-not-a-real-binary-xyz".to_string()),
            ..Config::default()
        };
        let external = from_config(&ctx, &config);
        assert!(!external.validate("p.json", OperationKind::Other).accepted);
    }

    #[test]
    fn truncate_keeps_tail() {
        let text = (1..=30).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let truncated = truncate_output(&text, 5, 1000);
        assert_eq!(truncated, "26\n27\n28\n29\n30");
    }
}
