//! Integration tests for StagedPipeline
//!
//! Items move persist -> transfer through real consumer threads:
//! - Happy path: each item persisted once and transferred once
//! - Persist failure: the whole batch is persisted again
//! - Transfer failure and timeout: only the failed items are transferred again
//! - A transfer that never returns does not hold up the other items
//! - Completion listener fires when both stages are idle
//! - Shutdown gates collaborators but not forwarding

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use priority_batch_queue::builders::PipelineBuilder;
use priority_batch_queue::config::QueueConfig;
use priority_batch_queue::core::{Persister, QueueError, Stage, StagedPipeline, Transferer};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn counts(items: &[u32]) -> HashMap<u32, usize> {
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(*item).or_insert(0) += 1;
    }
    counts
}

fn build<Ps, Tr>(persister: Ps, transferer: Tr) -> StagedPipeline<u32, Ps, Tr>
where
    Ps: Persister<u32>,
    Tr: Transferer<u32>,
{
    PipelineBuilder::new()
        .persist(QueueConfig::new().with_name("persist").with_consumer_count(2))
        .transfer(QueueConfig::new().with_name("transfer").with_consumer_count(2))
        .build(persister, transferer)
        .unwrap()
}

// ============================================================================
// TEST COLLABORATORS
// ============================================================================

/// Persists everything; fails the first `fail_calls` calls.
struct Store {
    fail_calls: usize,
    calls: AtomicUsize,
    persisted: Mutex<Vec<u32>>,
}

impl Store {
    fn new() -> Self {
        Self::failing(0)
    }

    fn failing(fail_calls: usize) -> Self {
        Self {
            fail_calls,
            calls: AtomicUsize::new(0),
            persisted: Mutex::new(Vec::new()),
        }
    }
}

impl Persister<u32> for Store {
    fn persist(&self, items: &[u32]) -> bool {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_calls {
            return false;
        }
        self.persisted.lock().extend_from_slice(items);
        true
    }

    fn max_processing_size(&self) -> usize {
        4
    }
}

enum Mode {
    Succeed,
    RefuseOnce,
    StallOnce(u32),
}

/// Records every call; optionally refuses or stalls first attempts.
struct Relay {
    mode: Mode,
    calls: Mutex<Vec<u32>>,
    delivered: Mutex<Vec<u32>>,
}

impl Relay {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            calls: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }
}

impl Transferer<u32> for Relay {
    fn transfer(&self, item: &u32) -> bool {
        let first = {
            let mut calls = self.calls.lock();
            let first = !calls.contains(item);
            calls.push(*item);
            first
        };
        match self.mode {
            Mode::RefuseOnce if first => return false,
            Mode::StallOnce(stalled) if first && *item == stalled => {
                thread::sleep(Duration::from_millis(500));
            }
            _ => {}
        }
        self.delivered.lock().push(*item);
        true
    }

    fn max_processing_size(&self) -> usize {
        4
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(150)
    }
}

/// Blocks every attempt on item 0 until released.
struct Wedged {
    release: AtomicBool,
    stalled_attempts: AtomicUsize,
    delivered: Mutex<Vec<u32>>,
}

impl Transferer<u32> for Wedged {
    fn transfer(&self, item: &u32) -> bool {
        if *item == 0 {
            self.stalled_attempts.fetch_add(1, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            return true;
        }
        self.delivered.lock().push(*item);
        true
    }

    fn max_processing_size(&self) -> usize {
        2
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }
}

// ============================================================================
// STAGING
// ============================================================================

#[test]
fn test_each_item_persisted_and_transferred_once() {
    let pipeline = build(Store::new(), Relay::new(Mode::Succeed));
    pipeline.start().unwrap();

    let report = pipeline.enqueue_all_for_persisting(0..20);
    assert!(report.is_complete());

    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.transferer().delivered.lock().len() == 20 && pipeline.is_idle()
    }));
    pipeline.stop();

    let persisted = counts(&pipeline.persister().persisted.lock());
    let delivered = counts(&pipeline.transferer().delivered.lock());
    for item in 0..20 {
        assert_eq!(persisted.get(&item), Some(&1));
        assert_eq!(delivered.get(&item), Some(&1));
    }
    assert_eq!(pipeline.size(Stage::Persist), 0);
    assert_eq!(pipeline.size(Stage::Transfer), 0);
    assert_eq!(pipeline.stats(Stage::Transfer).admitted, 20);
}

#[test]
fn test_enqueue_for_transferring_skips_persist() {
    let pipeline = build(Store::new(), Relay::new(Mode::Succeed));
    pipeline.start().unwrap();

    pipeline.enqueue_for_transferring(7).unwrap();
    pipeline.enqueue_all_for_transferring(vec![8, 9]);

    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.transferer().delivered.lock().len() == 3
    }));
    pipeline.stop();

    assert!(pipeline.persister().persisted.lock().is_empty());
    assert_eq!(pipeline.persister().calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// FAILURE HANDLING
// ============================================================================

#[test]
fn test_persist_failure_retries_batch() {
    let pipeline = build(Store::failing(2), Relay::new(Mode::Succeed));
    pipeline.start().unwrap();

    pipeline.enqueue_all_for_persisting(0..6);
    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.transferer().delivered.lock().len() == 6 && pipeline.is_idle()
    }));
    pipeline.stop();

    assert!(pipeline.persister().calls.load(Ordering::SeqCst) >= 3);
    assert!(pipeline.stats(Stage::Persist).requeued > 0);
    let delivered = counts(&pipeline.transferer().delivered.lock());
    assert_eq!(delivered.len(), 6);
}

#[test]
fn test_transfer_false_retries_item() {
    let pipeline = build(Store::new(), Relay::new(Mode::RefuseOnce));
    pipeline.start().unwrap();

    pipeline.enqueue_all_for_persisting(0..8);
    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.transferer().delivered.lock().len() == 8 && pipeline.is_idle()
    }));
    pipeline.stop();

    let calls = counts(&pipeline.transferer().calls.lock());
    for item in 0..8 {
        assert_eq!(calls.get(&item), Some(&2));
    }
    assert_eq!(pipeline.stats(Stage::Transfer).requeued, 8);
}

#[test]
fn test_transfer_timeout_retries_item() {
    let pipeline = build(Store::new(), Relay::new(Mode::StallOnce(5)));
    pipeline.start().unwrap();

    pipeline.enqueue_all_for_persisting(0..8);
    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.is_idle() && pipeline.transferer().calls.lock().len() >= 9
    }));

    let calls = counts(&pipeline.transferer().calls.lock());
    assert!(calls.get(&5).copied().unwrap_or(0) >= 2);
    for item in (0..8).filter(|i| *i != 5) {
        assert_eq!(calls.get(&item), Some(&1));
    }
    pipeline.stop();
}

#[test]
fn test_stalled_transfer_does_not_block_other_items() {
    let pipeline = PipelineBuilder::<u32>::new()
        .persist(QueueConfig::new().with_consumer_count(1))
        .transfer(QueueConfig::new().with_consumer_count(1))
        .build(
            Store::new(),
            Wedged {
                release: AtomicBool::new(false),
                stalled_attempts: AtomicUsize::new(0),
                delivered: Mutex::new(Vec::new()),
            },
        )
        .unwrap();
    pipeline.start().unwrap();

    pipeline.enqueue_for_transferring(0).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.transferer().stalled_attempts.load(Ordering::SeqCst) >= 2
    }));

    // item 0 is now wedged on more than one thread
    pipeline.enqueue_all_for_transferring(1..=5);
    let healthy_delivered = wait_until(Duration::from_secs(3), || {
        pipeline.transferer().delivered.lock().len() == 5
    });

    pipeline.transferer().release.store(true, Ordering::SeqCst);
    assert!(healthy_delivered);
    let mut delivered = pipeline.transferer().delivered.lock().clone();
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 2, 3, 4, 5]);

    pipeline.stop();
}

// ============================================================================
// COMPLETION AND SHUTDOWN
// ============================================================================

#[test]
fn test_listener_fires_when_both_stages_idle() {
    let pipeline = build(Store::new(), Relay::new(Mode::Succeed));

    let calls = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&calls);
    let id = pipeline.add_completion_listener(Arc::new(move |_safe: bool| {
        observed.fetch_add(1, Ordering::SeqCst);
    }));

    pipeline.start().unwrap();
    pipeline.enqueue_all_for_persisting(0..12);

    assert!(wait_until(Duration::from_secs(5), || {
        calls.load(Ordering::SeqCst) >= 1
    }));
    assert!(pipeline.is_idle());
    assert_eq!(pipeline.transferer().delivered.lock().len(), 12);

    assert!(pipeline.remove_completion_listener(id));
    pipeline.stop();
}

#[test]
fn test_shutdown_gates_admission_but_forwarding_flows() {
    let pipeline = build(Store::new(), Relay::new(Mode::Succeed));
    pipeline.enqueue_all_for_persisting(0..5);
    pipeline.signal_shutdown();

    assert_eq!(pipeline.enqueue_for_persisting(99), Err(QueueError::Shutdown));
    assert_eq!(
        pipeline.enqueue_for_transferring(99),
        Err(QueueError::Shutdown)
    );

    pipeline.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        pipeline.transferer().delivered.lock().len() == 5 && pipeline.is_idle()
    }));
    pipeline.stop();
    assert!(pipeline.stats(Stage::Persist).shutdown);
}
