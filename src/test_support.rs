use crate::error::{PerciaError, Result};
use crate::locks::ProcessProbe;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{LazyLock, Mutex, MutexGuard};
use tempfile::TempDir;

static CWD_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub(crate) struct DirGuard {
    original: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl DirGuard {
    pub(crate) fn new(new_dir: &Path) -> Self {
        // Changing the process current working directory is global and not thread-safe.
        // Lock it so tests don't race even if a #[serial] annotation is missed.
        let lock = CWD_LOCK.lock().unwrap_or_else(|poison| poison.into_inner());
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(new_dir).unwrap();
        Self {
            original,
            _lock: lock,
        }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.original);
    }
}

/// A git repository on branch `main` with one commit (`README.md`).
pub(crate) fn create_test_repo() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path();

    git(path, &["init"]);
    // Deterministic default branch name across environments.
    git(path, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "user.name", "Test User"]);

    std::fs::write(path.join("README.md"), "# Test\n").unwrap();
    git(path, &["add", "."]);
    git(path, &["commit", "-m", "Initial commit"]);

    temp_dir
}

/// A git repository with no commits yet.
pub(crate) fn create_empty_repo() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path();

    git(path, &["init"]);
    git(path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(path, &["config", "user.email", "test@example.com"]);
    git(path, &["config", "user.name", "Test User"]);

    temp_dir
}

/// Run git in `repo_dir`, panicking with its output on failure.
pub(crate) fn git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(repo_dir)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute git {}: {}", args.join(" "), e));

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "git {} failed (exit code {:?})\nstdout:\n{}\nstderr:\n{}",
            args.join(" "),
            output.status.code(),
            stdout,
            stderr
        );
    }

    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// In-memory process table.
///
/// Each entry maps a PID to its start-time fingerprint (`None` when the
/// fingerprint is unreadable).
#[derive(Debug, Default)]
pub(crate) struct FakeProbe {
    processes: Mutex<HashMap<u32, Option<u64>>>,
}

impl FakeProbe {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn spawn(&self, pid: u32, start_time: Option<u64>) {
        self.table().insert(pid, start_time);
    }

    pub(crate) fn kill(&self, pid: u32) {
        self.table().remove(&pid);
    }

    fn table(&self) -> MutexGuard<'_, HashMap<u32, Option<u64>>> {
        self.processes
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl ProcessProbe for FakeProbe {
    fn exists(&self, pid: u32) -> bool {
        self.table().contains_key(&pid)
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        self.table().get(&pid).copied().flatten()
    }
}

/// Scripted version-control backend.
///
/// Records every call; `fail_add` / `fail_commit` make the next matching call
/// fail with a git error.
#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeBackendState>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeBackendState {
    pub head: Option<String>,
    pub calls: Vec<String>,
    pub fail_add: bool,
    pub fail_commit: bool,
    pub commits: u32,
}

impl FakeBackend {
    pub(crate) fn with_head(head: &str) -> Self {
        let backend = Self::default();
        backend.state().head = Some(head.to_string());
        backend
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FakeBackendState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

impl crate::commit::VcsBackend for FakeBackend {
    fn head(&self) -> Result<Option<String>> {
        let mut state = self.state();
        state.calls.push("head".to_string());
        Ok(state.head.clone())
    }

    fn add(&self, paths: &[String]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("add {}", paths.join(" ")));
        if std::mem::take(&mut state.fail_add) {
            return Err(PerciaError::GitError("git add failed (exit code 128)".into()));
        }
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String> {
        let mut state = self.state();
        state.calls.push(format!("commit {}", message));
        if std::mem::take(&mut state.fail_commit) {
            return Err(PerciaError::GitError(
                "git commit failed (exit code 1)".into(),
            ));
        }
        state.commits += 1;
        let new_head = format!("{:040x}", 0xc0ffee_u64 + u64::from(state.commits));
        state.head = Some(new_head.clone());
        Ok(new_head)
    }

    fn restore(&self, target: &str, paths: &[String]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(format!("restore {} {}", target, paths.join(" ")));
        state.head = Some(target.to_string());
        Ok(())
    }
}
