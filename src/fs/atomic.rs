//! Atomic filesystem operations for percia.
//!
//! # Implementation Strategy
//!
//! Every write goes through a temporary file in the same directory as the
//! target:
//! 1. Write content to `.{filename}.{unique}.tmp`
//! 2. Sync the file to disk (fsync)
//! 3. Publish it:
//!    - [`atomic_write`] renames over the target (replace-as-a-whole)
//!    - [`create_exclusive`] hard-links to the target, which fails if the
//!      target already exists (exclusive create of a fully written file)
//! 4. Sync the parent directory so the new entry survives a crash
//!
//! # Important Notes
//!
//! - Source and destination must be on the same filesystem for atomic rename/link
//! - `link(2)` is atomic on local filesystems and on NFS; it is the only
//!   exclusivity primitive relied on, there is no fencing beyond it
//! - On crash, a temporary file may remain next to the target

use crate::error::{PerciaError, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Atomically write bytes to a file, replacing any previous content.
///
/// Readers observe either the old file or the complete new file, never a
/// partial write.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        PerciaError::io("atomically replace", path, e)
    })?;

    sync_parent(path);
    Ok(())
}

/// Atomically write a string to a file.
pub fn atomic_write_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes())
}

/// Publish `content` at `path` only if no file exists there.
///
/// # Returns
///
/// * `Ok(true)` - The file was created with the complete content
/// * `Ok(false)` - Another file already occupies `path`; nothing was changed
/// * `Err(PerciaError::IoError)` - Any other filesystem failure
pub fn create_exclusive<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<bool> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;

    let linked = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);

    match linked {
        Ok(()) => {
            sync_parent(path);
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(PerciaError::io("create", path, e)),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| PerciaError::io("create directory", parent, e))?;
    }
    Ok(())
}

/// Generate a unique temporary file path in the same directory as the target.
///
/// The suffix is unique per call so concurrent writers never share a temp file.
fn generate_temp_path(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PerciaError::UserError("invalid file path".to_string()))?;

    let unique = uuid::Uuid::new_v4().simple().to_string();
    Ok(parent.join(format!(".{}.{}.tmp", filename, &unique[..12])))
}

/// Write content to a file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| PerciaError::io("create temporary file", path, e))?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        PerciaError::io("write temporary file", path, e)
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        PerciaError::io("sync temporary file", path, e)
    })?;

    Ok(())
}

fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}
