//! Stale-holder detection.
//!
//! A recorded holder is alive only if a process with its PID exists *and*
//! that process started at the recorded time. A PID-only check would treat
//! an unrelated process that inherited a crashed holder's PID as the holder.

use std::sync::Arc;

/// Read access to the OS process table.
pub trait ProcessProbe: Send + Sync {
    /// Whether a (non-zombie) process with this PID exists.
    fn exists(&self, pid: u32) -> bool;

    /// Start-time fingerprint of the process, if it can be read.
    fn start_time(&self, pid: u32) -> Option<u64>;
}

/// Probe backed by the real process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn exists(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        if !pid_exists(pid) {
            return false;
        }
        // kill(pid, 0) succeeds for zombies; a zombie holds nothing.
        !matches!(read_proc_stat(pid), Some((state, _)) if state == 'Z')
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        read_proc_stat(pid).map(|(_, start)| start)
    }
}

#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the existence and permission checks only;
    // no signal is delivered.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to another user.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_exists(_pid: u32) -> bool {
    // Without a process table we cannot prove death; never reclaim.
    true
}

/// Parse `/proc/<pid>/stat` into (state, starttime).
///
/// The command name (field 2) may contain spaces and parentheses, so fields
/// are counted from the last `)`. `starttime` is field 22.
#[cfg(target_os = "linux")]
fn read_proc_stat(pid: u32) -> Option<(char, u64)> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_proc_stat(&stat)
}

#[cfg(not(target_os = "linux"))]
fn read_proc_stat(_pid: u32) -> Option<(char, u64)> {
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_stat(stat: &str) -> Option<(char, u64)> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] is field 3 (state), so field 22 lives at index 19.
    let state = fields.first()?.chars().next()?;
    let start = fields.get(19)?.parse().ok()?;
    Some((state, start))
}

/// Decides whether a recorded lock holder is still alive.
#[derive(Clone)]
pub struct StaleLockDetector {
    probe: Arc<dyn ProcessProbe>,
}

impl StaleLockDetector {
    pub fn new(probe: Arc<dyn ProcessProbe>) -> Self {
        Self { probe }
    }

    /// Detector backed by the real process table.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemProbe))
    }

    /// True only when `holder_pid` exists and its start time matches.
    ///
    /// When no fingerprint was recorded, or the live process's fingerprint
    /// cannot be read, existence alone decides: an unconfirmed mismatch is
    /// never treated as death.
    pub fn is_alive(&self, holder_pid: u32, process_start_time: Option<u64>) -> bool {
        if !self.probe.exists(holder_pid) {
            return false;
        }

        let Some(expected) = process_start_time else {
            return true;
        };

        match self.probe.start_time(holder_pid) {
            Some(actual) if actual != expected => {
                tracing::warn!(
                    pid = holder_pid,
                    expected,
                    actual,
                    "pid reused by an unrelated process; treating recorded holder as dead"
                );
                false
            }
            _ => true,
        }
    }
}

impl std::fmt::Debug for StaleLockDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleLockDetector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeProbe;

    #[test]
    fn parse_proc_stat_handles_spaces_and_parens_in_comm() {
        let stat = "4242 (my (odd) proc) S 1 4242 4242 0 -1 4194560 100 0 0 0 \
                    1 2 0 0 20 0 1 0 987654 1000000 200 18446744073709551615";
        assert_eq!(parse_proc_stat(stat), Some(('S', 987654)));
    }

    #[test]
    fn parse_proc_stat_rejects_truncated_input() {
        assert_eq!(parse_proc_stat("12 (short) R 1 2"), None);
        assert_eq!(parse_proc_stat("garbage"), None);
    }

    #[test]
    fn current_process_is_alive() {
        let me = crate::locks::HolderIdentity::current();
        let detector = StaleLockDetector::system();
        assert!(detector.is_alive(me.pid, me.start_time));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_has_start_time_on_linux() {
        assert!(SystemProbe.start_time(std::process::id()).is_some());
    }

    #[test]
    fn pid_zero_and_huge_pids_are_dead() {
        let detector = StaleLockDetector::system();
        assert!(!detector.is_alive(0, None));
        assert!(!detector.is_alive(u32::MAX, None));
        assert!(!detector.is_alive(4_000_000, None));
    }

    #[test]
    fn missing_process_is_dead() {
        let probe = Arc::new(FakeProbe::new());
        let detector = StaleLockDetector::new(probe);
        assert!(!detector.is_alive(1234, Some(10)));
    }

    #[test]
    fn matching_fingerprint_is_alive() {
        let probe = Arc::new(FakeProbe::new());
        probe.spawn(1234, Some(10));
        let detector = StaleLockDetector::new(probe);
        assert!(detector.is_alive(1234, Some(10)));
    }

    #[test]
    fn reused_pid_with_different_fingerprint_is_dead() {
        let probe = Arc::new(FakeProbe::new());
        probe.spawn(1234, Some(99));
        let detector = StaleLockDetector::new(probe);
        assert!(!detector.is_alive(1234, Some(10)));
    }

    #[test]
    fn unreadable_fingerprint_falls_back_to_existence() {
        let probe = Arc::new(FakeProbe::new());
        probe.spawn(1234, None);
        let detector = StaleLockDetector::new(probe.clone());
        assert!(detector.is_alive(1234, Some(10)));
        assert!(detector.is_alive(1234, None));
    }
}
