//! Validation of externally supplied identifiers before they reach git.
//!
//! All checks are full-string matches. Anything that fails is rejected with
//! `InputRejected` and never handed to a process.

use crate::context::STATE_DIR;
use crate::error::{PerciaError, Result};
use crate::git::FORBIDDEN_ARG_CHARS;
use globset::GlobSet;
use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

static REF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{7,40}$").expect("Invalid ref regex"));

static TRANSACTION_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").expect("Invalid transaction ID regex")
});

static SUBMITTER_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.@-]{0,127}$").expect("Invalid submitter ID regex")
});

/// Pathspec wildcards; git expands these even after `--`.
const PATHSPEC_CHARS: &[char] = &['*', '?', '[', ']', '\\'];

const MAX_MESSAGE_LEN: usize = 1024;

/// Validate a path to be staged and return it relative to `repo_root`.
///
/// Rejects empty values, control characters, shell metacharacters, pathspec
/// wildcards and magic, `..` components, absolute paths outside `repo_root`,
/// anything under `.percia/` or `.git/`, and paths not matched by `allowed`.
pub fn validate_path(raw: &str, repo_root: &Path, allowed: &GlobSet) -> Result<String> {
    let reject = |why: &str| {
        Err(PerciaError::InputRejected(format!(
            "path '{}' rejected: {}",
            raw.escape_debug(),
            why
        )))
    };

    if raw.trim().is_empty() {
        return reject("empty path");
    }
    if raw.chars().any(char::is_control) {
        return reject("contains control characters");
    }
    if raw.contains(FORBIDDEN_ARG_CHARS) {
        return reject("contains shell metacharacters");
    }
    if raw.contains(PATHSPEC_CHARS) || raw.starts_with(':') {
        return reject("contains pathspec wildcards or magic");
    }

    let path = Path::new(raw);
    let relative = if path.is_absolute() {
        match path.strip_prefix(repo_root) {
            Ok(rel) => rel,
            Err(_) => return reject("absolute path outside the repository"),
        }
    } else {
        path
    };

    let mut parts: Vec<&str> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => return reject("not valid UTF-8"),
            },
            Component::CurDir => {}
            Component::ParentDir => return reject("path traversal"),
            Component::RootDir | Component::Prefix(_) => {
                return reject("absolute path outside the repository");
            }
        }
    }

    match parts.first() {
        None => return reject("refers to the repository root"),
        Some(&first) if first == STATE_DIR || first == ".git" => {
            return reject("refers to internal state");
        }
        Some(first) if first.starts_with('-') => return reject("looks like an option"),
        _ => {}
    }

    let normalized = parts.join("/");
    if !allowed.is_match(&normalized) {
        return reject("not matched by stageable_globs");
    }

    Ok(normalized)
}

/// Validate a commit reference: 7 to 40 lowercase hex digits.
pub fn validate_ref(value: &str) -> Result<&str> {
    if REF_REGEX.is_match(value) {
        Ok(value)
    } else {
        Err(PerciaError::InputRejected(format!(
            "invalid commit reference '{}'",
            value.escape_debug()
        )))
    }
}

pub fn validate_transaction_id(value: &str) -> Result<()> {
    if TRANSACTION_ID_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(PerciaError::InputRejected(format!(
            "invalid transaction id '{}'",
            value.escape_debug()
        )))
    }
}

pub fn validate_submitter_id(value: &str) -> Result<()> {
    if SUBMITTER_ID_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(PerciaError::InputRejected(format!(
            "invalid submitter id '{}'",
            value.escape_debug()
        )))
    }
}

/// Validate a commit message: one non-empty line free of metacharacters.
pub fn validate_message(message: &str) -> Result<()> {
    if message.trim().is_empty() {
        return Err(PerciaError::InputRejected(
            "commit message is empty".to_string(),
        ));
    }
    if message.len() > MAX_MESSAGE_LEN {
        return Err(PerciaError::InputRejected(format!(
            "commit message longer than {} bytes",
            MAX_MESSAGE_LEN
        )));
    }
    if message.chars().any(char::is_control) || message.contains(FORBIDDEN_ARG_CHARS) {
        return Err(PerciaError::InputRejected(format!(
            "commit message '{}' contains control characters or shell metacharacters",
            message.escape_debug()
        )));
    }
    Ok(())
}
