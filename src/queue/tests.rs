//! Tests for the admission queue.

use super::*;
use crate::config::Config;
use crate::context::StoreContext;
use crate::error::PerciaError;
use crate::events::{EventAction, read_events};
use crate::locks::{HolderIdentity, LockManager, LockSettings, StaleLockDetector};
use crate::test_support::FakeProbe;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const FAST: LockSettings = LockSettings {
    poll_interval: Duration::from_millis(5),
    timeout_seconds: 300,
};

fn manager(ctx: &StoreContext, probe: &Arc<FakeProbe>, pid: u32) -> Arc<LockManager> {
    probe.spawn(pid, Some(u64::from(pid)));
    Arc::new(
        LockManager::new(ctx, FAST)
            .with_identity(HolderIdentity {
                pid,
                start_time: Some(u64::from(pid)),
            })
            .with_detector(StaleLockDetector::new(probe.clone())),
    )
}

fn queue_for(ctx: &StoreContext, lock: Arc<LockManager>) -> AdmissionQueue {
    AdmissionQueue::new(ctx, lock, &Config::default())
        .unwrap()
        .with_wait(Duration::from_secs(10))
}

fn create_test_queue() -> (TempDir, StoreContext, Arc<FakeProbe>, AdmissionQueue) {
    let temp = TempDir::new().unwrap();
    let ctx = StoreContext::at(temp.path());
    let probe = Arc::new(FakeProbe::new());
    let queue = queue_for(&ctx, manager(&ctx, &probe, 100));
    (temp, ctx, probe, queue)
}

#[test]
fn test_enqueue_assigns_sequential_ids() {
    let (_temp, ctx, _probe, queue) = create_test_queue();

    assert_eq!(queue.enqueue(OperationKind::Proposal, "a", "p1.json").unwrap(), 1);
    assert_eq!(queue.enqueue(OperationKind::Challenge, "b", "p2.json").unwrap(), 2);
    assert_eq!(queue.enqueue(OperationKind::Decision, "c", "p3.json").unwrap(), 3);

    let entries = queue.snapshot().unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.state == EntryState::Pending));
    assert_eq!(entries[1].submitter_id, "b");
    assert_eq!(entries[1].operation_kind, OperationKind::Challenge);

    assert!(!ctx.lock_path().exists());
    let events = read_events(&ctx).unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.action == EventAction::Enqueue));
}

#[test]
fn test_enqueue_normalizes_payload_reference() {
    let (_temp, ctx, _probe, queue) = create_test_queue();
    let absolute = ctx.repo_root.join("state/p.json");

    queue
        .enqueue(OperationKind::Other, "a", &absolute.to_string_lossy())
        .unwrap();
    queue.enqueue(OperationKind::Other, "a", "./state//q.json").unwrap();

    let entries = queue.snapshot().unwrap();
    assert_eq!(entries[0].payload_reference, "state/p.json");
    assert_eq!(entries[1].payload_reference, "state/q.json");
}

#[test]
fn test_enqueue_rejects_bad_input_without_touching_queue() {
    let (_temp, ctx, _probe, queue) = create_test_queue();

    for (submitter, payload) in [
        ("a;b", "p.json"),
        ("", "p.json"),
        ("a", "../p.json"),
        ("a", "/etc/passwd"),
        ("a", "p\0.json"),
        ("a", ".percia/queue.json"),
    ] {
        let err = queue
            .enqueue(OperationKind::Proposal, submitter, payload)
            .unwrap_err();
        assert!(matches!(err, PerciaError::InputRejected(_)), "{:?}", err);
    }

    assert!(!ctx.queue_path().exists());
}

#[test]
fn test_dequeue_is_fifo_and_skips_claimed() {
    let (_temp, _ctx, _probe, queue) = create_test_queue();
    for i in 1..=3 {
        queue
            .enqueue(OperationKind::Proposal, "a", &format!("p{}.json", i))
            .unwrap();
    }

    let first = queue.dequeue_next().unwrap().unwrap();
    assert_eq!(first.entry_id, 1);
    assert_eq!(first.state, EntryState::InProgress);
    assert_eq!(first.claimed_by.unwrap().pid, 100);

    // Entry 1 is still in progress; the next claim takes 2.
    assert_eq!(queue.dequeue_next().unwrap().unwrap().entry_id, 2);
    assert_eq!(queue.dequeue_next().unwrap().unwrap().entry_id, 3);
    assert!(queue.dequeue_next().unwrap().is_none());
}

#[test]
fn test_fifo_under_concurrent_enqueue() {
    let (_temp, ctx, probe, queue) = create_test_queue();

    let writers: Vec<_> = (0..4u32)
        .map(|w| {
            let queue = queue_for(&ctx, manager(&ctx, &probe, 200 + w));
            thread::spawn(move || {
                (0..5)
                    .map(|i| {
                        let payload = format!("w{}-{}.json", w, i);
                        queue
                            .enqueue(OperationKind::Proposal, &format!("w{}", w), &payload)
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<u64> = writers
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());

    let mut dequeued = Vec::new();
    while let Some(entry) = queue.dequeue_next().unwrap() {
        dequeued.push(entry.entry_id);
    }
    assert_eq!(dequeued, (1..=20).collect::<Vec<_>>());
}

#[test]
fn test_per_writer_order_preserved() {
    let (_temp, _ctx, _probe, queue) = create_test_queue();
    let a1 = queue.enqueue(OperationKind::Proposal, "a", "a1.json").unwrap();
    let b1 = queue.enqueue(OperationKind::Proposal, "b", "b1.json").unwrap();
    let a2 = queue.enqueue(OperationKind::Proposal, "a", "a2.json").unwrap();

    let order: Vec<u64> = std::iter::from_fn(|| queue.dequeue_next().unwrap())
        .map(|e| e.entry_id)
        .collect();
    assert_eq!(order, vec![a1, b1, a2]);
}

#[test]
fn test_mark_enforces_forward_transitions() {
    let (_temp, ctx, _probe, queue) = create_test_queue();
    let id = queue.enqueue(OperationKind::Decision, "a", "p.json").unwrap();

    let err = queue.mark(id, EntryState::Completed, None).unwrap_err();
    assert!(matches!(err, PerciaError::InvalidTransition(_)));

    queue.dequeue_next().unwrap();
    let done = queue.mark(id, EntryState::Completed, None).unwrap();
    assert_eq!(done.state, EntryState::Completed);
    assert!(done.completed_at.is_some());

    for next in [EntryState::Pending, EntryState::InProgress, EntryState::Failed] {
        assert!(matches!(
            queue.mark(id, next, None),
            Err(PerciaError::InvalidTransition(_))
        ));
    }

    let events = read_events(&ctx).unwrap();
    assert_eq!(events.last().unwrap().action, EventAction::Complete);
}

#[test]
fn test_mark_pending_entry_failed_with_error() {
    let (_temp, _ctx, _probe, queue) = create_test_queue();
    let id = queue.enqueue(OperationKind::Other, "a", "p.json").unwrap();

    let failed = queue
        .mark(id, EntryState::Failed, Some("withdrawn".into()))
        .unwrap();
    assert_eq!(failed.error.as_deref(), Some("withdrawn"));
    assert!(queue.dequeue_next().unwrap().is_none());
}

#[test]
fn test_mark_unknown_entry() {
    let (_temp, _ctx, _probe, queue) = create_test_queue();
    assert!(matches!(
        queue.mark(42, EntryState::Failed, None),
        Err(PerciaError::UserError(_))
    ));
}

#[test]
fn test_locked_variants_share_one_critical_section() {
    let (_temp, ctx, _probe, queue) = create_test_queue();
    let lock = queue.lock().clone();

    let guard = lock.scoped_acquire(Duration::from_millis(100)).unwrap();
    let id = queue
        .enqueue_locked(&guard, OperationKind::Proposal, "a", "p.json")
        .unwrap();
    let entry = queue.dequeue_next_locked(&guard).unwrap().unwrap();
    assert_eq!(entry.entry_id, id);
    let done = queue.complete_locked(&guard, id, "abc1234").unwrap();
    assert_eq!(done.commit_ref.as_deref(), Some("abc1234"));
    assert_eq!(queue.entries_locked(&guard).unwrap().len(), 1);
    assert!(ctx.lock_path().exists());
    drop(guard);

    assert!(!ctx.lock_path().exists());
}

#[test]
fn test_locked_variant_rejects_foreign_guard() {
    let (_temp, ctx, probe, queue) = create_test_queue();
    let other = manager(&ctx, &probe, 300);

    let guard = other.scoped_acquire(Duration::from_millis(100)).unwrap();
    let err = queue.entries_locked(&guard).unwrap_err();
    assert!(matches!(err, PerciaError::LockNotHeld(_)));
}

#[test]
fn test_operations_time_out_while_lock_held_elsewhere() {
    let (_temp, ctx, probe, queue) = create_test_queue();
    let queue = queue.with_wait(Duration::from_millis(30));
    let other = manager(&ctx, &probe, 300);

    let _held = other.scoped_acquire(Duration::from_millis(100)).unwrap();
    let err = queue
        .enqueue(OperationKind::Proposal, "a", "p.json")
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        queue.snapshot(),
        Err(PerciaError::LockTimeout(_))
    ));
}

#[test]
fn test_recover_abandoned_fails_dead_claimants_only() {
    let (_temp, ctx, probe, _queue) = create_test_queue();
    let crashed = queue_for(&ctx, manager(&ctx, &probe, 400));
    let live = queue_for(&ctx, manager(&ctx, &probe, 500));

    crashed.enqueue(OperationKind::Proposal, "a", "p1.json").unwrap();
    crashed.enqueue(OperationKind::Proposal, "a", "p2.json").unwrap();
    crashed.enqueue(OperationKind::Proposal, "a", "p3.json").unwrap();

    assert_eq!(crashed.dequeue_next().unwrap().unwrap().entry_id, 1);
    assert_eq!(live.dequeue_next().unwrap().unwrap().entry_id, 2);
    probe.kill(400);

    let recovered = live.recover_abandoned().unwrap();
    assert_eq!(recovered, vec![1]);

    let entries = live.snapshot().unwrap();
    assert_eq!(entries[0].state, EntryState::Failed);
    assert_eq!(
        entries[0].error.as_deref(),
        Some("abandoned by crashed dispatcher")
    );
    assert_eq!(entries[1].state, EntryState::InProgress);
    assert_eq!(entries[2].state, EntryState::Pending);

    assert!(live.recover_abandoned().unwrap().is_empty());
}

#[test]
fn test_malformed_queue_file_is_an_error() {
    let (_temp, ctx, _probe, queue) = create_test_queue();
    ctx.ensure_state_dir().unwrap();
    std::fs::write(ctx.queue_path(), "not json").unwrap();

    let err = queue
        .enqueue(OperationKind::Proposal, "a", "p.json")
        .unwrap_err();
    assert!(err.to_string().contains("malformed"));
    assert_eq!(std::fs::read_to_string(ctx.queue_path()).unwrap(), "not json");
    assert!(!ctx.lock_path().exists());
}

#[test]
fn test_ids_never_reused() {
    let (_temp, ctx, _probe, queue) = create_test_queue();
    queue.enqueue(OperationKind::Proposal, "a", "p.json").unwrap();

    // Entries archived externally; the counter survives.
    let mut file = QueueFile::load(ctx.queue_path()).unwrap();
    file.entries.clear();
    file.save(ctx.queue_path()).unwrap();

    assert_eq!(queue.enqueue(OperationKind::Proposal, "a", "q.json").unwrap(), 2);
}
