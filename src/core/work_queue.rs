//! Thread-safe priority work queue with admission control and idle signaling.
//!
//! The queue is the only shared structure between producers and consumers.
//! Everything that must be observed atomically (held items, outstanding
//! batches, the shutdown gate, the stop flag) lives under one `parking_lot`
//! mutex, and consumers park on a `Condvar` until items arrive.
//!
//! Idle detection: the queue is idle when it holds no items and no batch taken
//! with [`PriorityWorkQueue::take_batch`] is outstanding. Completion listeners
//! are informed once per busy → idle transition.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::core::QueueError;
use crate::infra::queue::memory::{Comparator, OrderedBuffer};

/// Outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The item was added to the queue.
    Queued,
    /// An equal item was already queued; nothing changed.
    Duplicate,
}

/// Per-item outcome of [`PriorityWorkQueue::enqueue_all`].
///
/// Admission is best-effort: items admitted before a rejection stay queued.
#[derive(Debug)]
pub struct EnqueueReport<T> {
    /// Items added to the queue.
    pub admitted: usize,
    /// Items ignored because an equal item was already queued.
    pub duplicates: usize,
    /// Items refused, with the reason for each.
    pub rejected: Vec<(T, QueueError)>,
}

impl<T> Default for EnqueueReport<T> {
    fn default() -> Self {
        Self {
            admitted: 0,
            duplicates: 0,
            rejected: Vec::new(),
        }
    }
}

impl<T> EnqueueReport<T> {
    /// Whether every item was either admitted or a duplicate.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Observer informed when a queue and its consumers become idle.
pub trait CompletionListener: Send + Sync {
    /// Called after the last outstanding batch finished and the queue is empty.
    ///
    /// `safe_to_shutdown` is true when shutdown has been signaled, so no new
    /// work can arrive from collaborators.
    fn task_completed(&self, safe_to_shutdown: bool);
}

impl<F> CompletionListener for F
where
    F: Fn(bool) + Send + Sync,
{
    fn task_completed(&self, safe_to_shutdown: bool) {
        self(safe_to_shutdown);
    }
}

/// Handle returned by listener registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Snapshot of queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Queue name used in logs.
    pub name: String,
    /// Items currently queued.
    pub size: usize,
    /// Batches taken but not yet completed.
    pub outstanding_batches: usize,
    /// Items admitted through `enqueue`/`enqueue_all`.
    pub admitted: u64,
    /// Items ignored as duplicates.
    pub duplicates: u64,
    /// Items refused for capacity or shutdown.
    pub rejected: u64,
    /// Items put back after a failed attempt.
    pub requeued: u64,
    /// Batches completed.
    pub batches: u64,
    /// Whether shutdown has been signaled.
    pub shutdown: bool,
}

#[derive(Debug, Default)]
struct QueueCounters {
    admitted: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    requeued: AtomicU64,
    batches: AtomicU64,
}

struct QueueState<T> {
    buffer: OrderedBuffer<T>,
    outstanding: usize,
    shutdown: bool,
    stopped: bool,
    idle_announced: bool,
}

/// Priority-ordered, optionally bounded, duplicate-free work queue.
pub struct PriorityWorkQueue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    available: Condvar,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn CompletionListener>)>>,
    next_listener_id: AtomicU64,
    counters: QueueCounters,
}

impl<T> fmt::Debug for PriorityWorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PriorityWorkQueue")
            .field("name", &self.name)
            .field("size", &state.buffer.len())
            .field("outstanding", &state.outstanding)
            .field("shutdown", &state.shutdown)
            .finish_non_exhaustive()
    }
}

impl<T: PartialEq> PriorityWorkQueue<T> {
    /// Create an unnamed FIFO queue with an optional size limit.
    #[must_use]
    pub fn new(max_size: Option<usize>) -> Self {
        Self::build(default_name(), max_size, None)
    }

    /// Create a queue from configuration with an optional comparator.
    #[must_use]
    pub fn from_config(config: &QueueConfig, comparator: Option<Comparator<T>>) -> Self {
        let name = config.name.clone().unwrap_or_else(default_name);
        Self::build(name, config.max_size, comparator)
    }

    fn build(name: String, max_size: Option<usize>, comparator: Option<Comparator<T>>) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState {
                buffer: OrderedBuffer::new(max_size, comparator),
                outstanding: 0,
                shutdown: false,
                stopped: false,
                // a fresh queue counts as already idle
                idle_announced: true,
            }),
            available: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            counters: QueueCounters::default(),
        }
    }

    /// Set the name used in log fields.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Order items with `comparator`; items comparing `Less` drain first.
    #[must_use]
    pub fn with_comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&T, &T) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        let state = self.state.get_mut();
        let items = state.buffer.drain_all();
        state.buffer = OrderedBuffer::new(state.buffer.max_size(), Some(Arc::new(comparator)));
        for item in items {
            state.buffer.force_push(item);
        }
        self
    }

    /// Admit one item.
    ///
    /// A duplicate of a queued item is ignored and reported as
    /// [`Admission::Duplicate`]. On success a waiting consumer is woken at once.
    ///
    /// # Errors
    ///
    /// - [`QueueError::Shutdown`] after [`signal_shutdown`](Self::signal_shutdown)
    /// - [`QueueError::CapacityExceeded`] when the size limit is reached
    pub fn enqueue(&self, item: T) -> Result<Admission, QueueError> {
        let mut state = self.state.lock();
        let outcome = Self::admit(&mut state, item);
        drop(state);

        match outcome {
            Ok(Admission::Queued) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                self.available.notify_one();
                Ok(Admission::Queued)
            }
            Ok(Admission::Duplicate) => {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                Ok(Admission::Duplicate)
            }
            Err((_, e)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(queue = %self.name, error = %e, "item rejected");
                Err(e)
            }
        }
    }

    /// Admit several items, each with [`enqueue`](Self::enqueue) semantics.
    ///
    /// The call is not atomic: a rejection does not undo earlier admissions and
    /// does not stop later items from being tried.
    pub fn enqueue_all<I>(&self, items: I) -> EnqueueReport<T>
    where
        I: IntoIterator<Item = T>,
    {
        let mut report = EnqueueReport::default();
        {
            let mut state = self.state.lock();
            for item in items {
                match Self::admit(&mut state, item) {
                    Ok(Admission::Queued) => report.admitted += 1,
                    Ok(Admission::Duplicate) => report.duplicates += 1,
                    Err(rejection) => report.rejected.push(rejection),
                }
            }
        }

        self.counters
            .admitted
            .fetch_add(report.admitted as u64, Ordering::Relaxed);
        self.counters
            .duplicates
            .fetch_add(report.duplicates as u64, Ordering::Relaxed);
        if !report.rejected.is_empty() {
            self.counters
                .rejected
                .fetch_add(report.rejected.len() as u64, Ordering::Relaxed);
            warn!(
                queue = %self.name,
                rejected = report.rejected.len(),
                admitted = report.admitted,
                "some items rejected"
            );
        }
        if report.admitted > 0 {
            self.available.notify_all();
        }
        report
    }

    /// Put back items whose processing failed.
    ///
    /// Retries were admitted once already, so they bypass both the size limit
    /// and the shutdown gate. Duplicates of queued items are dropped. Returns
    /// the number of items queued again.
    pub fn requeue<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let queued = self.force_admit(items);
        if queued > 0 {
            self.counters
                .requeued
                .fetch_add(queued as u64, Ordering::Relaxed);
            debug!(queue = %self.name, count = queued, "items requeued");
        }
        queued
    }

    /// Hand items over from an upstream stage that already admitted them.
    ///
    /// Same gates as [`requeue`](Self::requeue), but counted as admissions.
    pub(crate) fn forward<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let queued = self.force_admit(items);
        if queued > 0 {
            self.counters
                .admitted
                .fetch_add(queued as u64, Ordering::Relaxed);
            debug!(queue = %self.name, count = queued, "items forwarded");
        }
        queued
    }

    fn force_admit<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let queued = {
            let mut state = self.state.lock();
            let mut queued = 0;
            for item in items {
                if state.buffer.force_push(item) == Admission::Queued {
                    queued += 1;
                }
            }
            if queued > 0 {
                state.idle_announced = false;
            }
            queued
        };
        if queued > 0 {
            self.available.notify_all();
        }
        queued
    }

    fn admit(state: &mut QueueState<T>, item: T) -> Result<Admission, (T, QueueError)> {
        if state.shutdown {
            return Err((item, QueueError::Shutdown));
        }
        let admission = state.buffer.push(item)?;
        if admission == Admission::Queued {
            state.idle_announced = false;
        }
        Ok(admission)
    }

    /// Block until items are available, then drain up to `max` of them.
    ///
    /// The returned batch counts as outstanding until
    /// [`complete_batch`](Self::complete_batch) is called. Returns `None` once
    /// the queue is stopped.
    pub fn take_batch(&self, max: usize) -> Option<Vec<T>> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            if !state.buffer.is_empty() {
                break;
            }
            self.available.wait(&mut state);
        }

        let batch = state.buffer.drain_up_to(max.max(1));
        state.outstanding += 1;
        let remaining = state.buffer.len();
        drop(state);

        if remaining > 0 {
            // leftovers for another consumer
            self.available.notify_one();
        }
        Some(batch)
    }

    /// Drain up to `max` items without blocking or counting a batch.
    pub fn poll_up_to(&self, max: usize) -> Vec<T> {
        self.state.lock().buffer.drain_up_to(max)
    }

    /// Remove and return every queued item, typically after [`stop`](Self::stop).
    pub fn drain_remaining(&self) -> Vec<T> {
        self.state.lock().buffer.drain_all()
    }
}

impl<T> PriorityWorkQueue<T> {
    /// Mark one outstanding batch as finished.
    ///
    /// When this leaves the queue empty with nothing outstanding, completion
    /// listeners are informed (once per idle transition).
    pub fn complete_batch(&self) {
        let announce = {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.buffer.is_empty() && state.outstanding == 0 && !state.idle_announced {
                state.idle_announced = true;
                Some(state.shutdown)
            } else {
                None
            }
        };
        self.counters.batches.fetch_add(1, Ordering::Relaxed);

        if let Some(safe_to_shutdown) = announce {
            debug!(queue = %self.name, safe_to_shutdown, "queue idle");
            self.inform_listeners(safe_to_shutdown);
        }
    }

    fn inform_listeners(&self, safe_to_shutdown: bool) {
        let listeners: Vec<Arc<dyn CompletionListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.task_completed(safe_to_shutdown)));
            if outcome.is_err() {
                error!(queue = %self.name, "completion listener panicked");
            }
        }
    }

    /// Register a completion listener.
    pub fn add_completion_listener(&self, listener: Arc<dyn CompletionListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Deregister a completion listener. Returns false if `id` was unknown.
    pub fn remove_completion_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(held, _)| *held != id);
        listeners.len() != before
    }

    /// Items ever taken in, by admission, forwarding or requeue.
    pub(crate) fn intake(&self) -> u64 {
        self.counters.admitted.load(Ordering::Relaxed)
            + self.counters.requeued.load(Ordering::Relaxed)
    }

    /// Stop admitting collaborator items. Queued items keep draining.
    pub fn signal_shutdown(&self) {
        let mut state = self.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            info!(queue = %self.name, size = state.buffer.len(), "shutdown signaled");
        }
    }

    /// Whether shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Wake every blocked consumer and make [`take_batch`](PriorityWorkQueue::take_batch)
    /// return `None` from now on. Queued items stay in the queue.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.available.notify_all();
        debug!(queue = %self.name, "queue stopped");
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Current number of queued items.
    pub fn size(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Whether no items are queued.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether no items are queued and no batch is outstanding.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.buffer.is_empty() && state.outstanding == 0
    }

    /// Number of batches taken but not yet completed.
    pub fn outstanding_batches(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Queue name used in log fields.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of counters and current depth.
    pub fn stats(&self) -> QueueStats {
        let (size, outstanding_batches, shutdown) = {
            let state = self.state.lock();
            (state.buffer.len(), state.outstanding, state.shutdown)
        };
        QueueStats {
            name: self.name.clone(),
            size,
            outstanding_batches,
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            shutdown,
        }
    }
}

/// Completes one outstanding batch exactly once, on request or on drop.
///
/// Consumers hold one per batch so a panicking processor still releases the
/// batch. The pumping queue shares it between the pump (timeout path) and the
/// execution task (normal path).
pub(crate) struct BatchCompletion<T> {
    queue: Arc<PriorityWorkQueue<T>>,
    done: AtomicBool,
}

impl<T> BatchCompletion<T> {
    pub(crate) const fn new(queue: Arc<PriorityWorkQueue<T>>) -> Self {
        Self {
            queue,
            done: AtomicBool::new(false),
        }
    }

    pub(crate) fn complete(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.queue.complete_batch();
        }
    }
}

impl<T> Drop for BatchCompletion<T> {
    fn drop(&mut self) {
        self.complete();
    }
}

fn default_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("queue-{}", &id[..8])
}
