//! Consumer pool draining a [`PriorityWorkQueue`] through a [`Processor`].
//!
//! Each consumer is a long-lived OS thread running the same cycle:
//!
//! 1. finish the previous batch (informing completion listeners on idle),
//! 2. park on the queue until an item is available,
//! 3. drain up to `max_processing_size` items,
//! 4. `process` the batch, then `processing_completed`, even if `process` panicked.
//!
//! A panic in collaborator code is logged and the consumer moves on to the
//! next batch; nothing a processor does can end the loop.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::QueueConfig;
use crate::core::processor::effective_processing_size;
use crate::core::task_pool::{join_with_timeout, panic_message};
use crate::core::work_queue::BatchCompletion;
use crate::core::{
    Admission, CompletionListener, EnqueueReport, ListenerId, PriorityWorkQueue, Processor,
    QueueError, QueueStats,
};
use crate::infra::queue::memory::Comparator;

/// How long [`ProcessingQueue::stop`] waits for each consumer before detaching it.
pub const CONSUMER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Priority work queue drained by a fixed pool of consumer threads.
pub struct ProcessingQueue<T, P> {
    queue: Arc<PriorityWorkQueue<T>>,
    processor: Arc<P>,
    batch_size: usize,
    consumer_count: usize,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<T, P> ProcessingQueue<T, P>
where
    T: PartialEq + Send + 'static,
    P: Processor<T>,
{
    /// Create an unbounded FIFO processing queue with default settings.
    pub fn new(processor: P) -> Self {
        Self::assemble(processor, &QueueConfig::default(), None)
    }

    /// Create a processing queue from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConfig`] if `config` fails validation.
    pub fn with_config(
        processor: P,
        config: &QueueConfig,
        comparator: Option<Comparator<T>>,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::InvalidConfig)?;
        Ok(Self::assemble(processor, config, comparator))
    }

    fn assemble(processor: P, config: &QueueConfig, comparator: Option<Comparator<T>>) -> Self {
        let queue = Arc::new(PriorityWorkQueue::from_config(config, comparator));
        Self::from_parts(queue, processor, config.consumer_count)
    }

    /// Wire consumers onto a queue created elsewhere, for processors that
    /// need a handle on their own queue.
    pub(crate) fn from_parts(
        queue: Arc<PriorityWorkQueue<T>>,
        processor: P,
        consumer_count: Option<usize>,
    ) -> Self {
        let batch_size = effective_processing_size(processor.max_processing_size());
        Self {
            queue,
            processor: Arc::new(processor),
            batch_size,
            consumer_count: consumer_count.unwrap_or(batch_size).max(1),
            consumers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the consumer threads.
    ///
    /// If a thread cannot be created, the consumers already running are
    /// stopped and joined, and the queue is left stopped.
    ///
    /// # Errors
    ///
    /// - [`QueueError::AlreadyStarted`] on a second call
    /// - [`QueueError::Spawn`] if a consumer thread cannot be created
    pub fn start(&self) -> Result<(), QueueError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(QueueError::AlreadyStarted);
        }

        let consumers = spawn_all(
            self.queue.name(),
            self.consumer_count,
            |consumer_id| {
                let queue = Arc::clone(&self.queue);
                let processor = Arc::clone(&self.processor);
                let batch_size = self.batch_size;
                thread::Builder::new()
                    .name(format!("{}-consumer-{consumer_id}", self.queue.name()))
                    .spawn(move || run_consumer(consumer_id, &queue, &processor, batch_size))
            },
            || self.queue.stop(),
        )?;
        self.consumers.lock().extend(consumers);

        info!(
            queue = %self.queue.name(),
            consumers = self.consumer_count,
            max_processing_size = self.batch_size,
            "processing queue started"
        );
        Ok(())
    }

    /// Admit one item. See [`PriorityWorkQueue::enqueue`].
    ///
    /// # Errors
    ///
    /// Returns the admission failure (capacity or shutdown).
    pub fn enqueue(&self, item: T) -> Result<Admission, QueueError> {
        self.queue.enqueue(item)
    }

    /// Admit several items best-effort. See [`PriorityWorkQueue::enqueue_all`].
    pub fn enqueue_all<I>(&self, items: I) -> EnqueueReport<T>
    where
        I: IntoIterator<Item = T>,
    {
        self.queue.enqueue_all(items)
    }
}

impl<T, P> ProcessingQueue<T, P> {
    /// Current number of queued items.
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    /// Whether nothing is queued and every consumer is parked.
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Stop admitting new items; queued items keep draining.
    pub fn signal_shutdown(&self) {
        self.queue.signal_shutdown();
    }

    /// Register a completion listener.
    pub fn add_completion_listener(&self, listener: Arc<dyn CompletionListener>) -> ListenerId {
        self.queue.add_completion_listener(listener)
    }

    /// Deregister a completion listener.
    pub fn remove_completion_listener(&self, id: ListenerId) -> bool {
        self.queue.remove_completion_listener(id)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// The underlying queue, for collaborators that requeue their own failures.
    pub const fn queue(&self) -> &Arc<PriorityWorkQueue<T>> {
        &self.queue
    }

    /// The processing contract.
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Batch size handed to the processor.
    pub const fn max_processing_size(&self) -> usize {
        self.batch_size
    }

    /// Number of consumer threads started by [`start`](ProcessingQueue::start).
    pub const fn consumer_count(&self) -> usize {
        self.consumer_count
    }

    /// Stop the consumers after their current batch and join them.
    ///
    /// Items still queued stay in the queue.
    pub fn stop(&self) {
        self.queue.stop();
        let consumers: Vec<JoinHandle<()>> = self.consumers.lock().drain(..).collect();
        if !consumers.is_empty() {
            join_with_timeout(self.queue.name(), consumers, CONSUMER_JOIN_TIMEOUT);
            info!(queue = %self.queue.name(), "processing queue stopped");
        }
    }
}

impl<T, P> Drop for ProcessingQueue<T, P> {
    fn drop(&mut self) {
        // wake and detach consumers; explicit stop() is required to join them
        self.queue.stop();
    }
}

/// Spawn `count` threads, or none: on the first failure `halt` releases the
/// threads already running and they are joined.
fn spawn_all<S, H>(
    owner: &str,
    count: usize,
    mut spawn: S,
    halt: H,
) -> Result<Vec<JoinHandle<()>>, QueueError>
where
    S: FnMut(usize) -> io::Result<JoinHandle<()>>,
    H: FnOnce(),
{
    let mut handles = Vec::with_capacity(count);
    for index in 0..count {
        match spawn(index) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!(
                    owner = %owner,
                    spawned = handles.len(),
                    error = %e,
                    "thread spawn failed, stopping the threads already running"
                );
                halt();
                join_with_timeout(owner, handles, CONSUMER_JOIN_TIMEOUT);
                return Err(QueueError::Spawn(e.to_string()));
            }
        }
    }
    Ok(handles)
}

fn run_consumer<T, P>(
    consumer_id: usize,
    queue: &Arc<PriorityWorkQueue<T>>,
    processor: &Arc<P>,
    batch_size: usize,
) where
    T: PartialEq + Send + 'static,
    P: Processor<T>,
{
    debug!(queue = %queue.name(), consumer_id, "consumer started");

    while let Some(batch) = queue.take_batch(batch_size) {
        let completion = BatchCompletion::new(Arc::clone(queue));
        debug!(
            queue = %queue.name(),
            consumer_id,
            batch_size = batch.len(),
            "processing batch"
        );

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| processor.process(&batch))) {
            error!(
                queue = %queue.name(),
                consumer_id,
                error = %panic_message(payload.as_ref()),
                "processor panicked"
            );
        }
        if let Err(payload) =
            catch_unwind(AssertUnwindSafe(|| processor.processing_completed(&batch)))
        {
            error!(
                queue = %queue.name(),
                consumer_id,
                error = %panic_message(payload.as_ref()),
                "completion hook panicked"
            );
        }

        completion.complete();
    }

    debug!(queue = %queue.name(), consumer_id, "consumer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct Counting {
        processed: AtomicUsize,
        completed: AtomicUsize,
    }

    impl Processor<u32> for Counting {
        fn max_processing_size(&self) -> usize {
            4
        }

        fn process(&self, items: &[u32]) {
            self.processed.fetch_add(items.len(), Ordering::SeqCst);
        }

        fn processing_completed(&self, _items: &[u32]) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

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

    #[test]
    fn test_processes_all_items() {
        let queue = ProcessingQueue::with_config(
            Counting {
                processed: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            },
            &QueueConfig::new().with_consumer_count(2),
            None,
        )
        .unwrap();
        queue.start().unwrap();

        queue.enqueue_all(0..20);
        assert!(wait_until(Duration::from_secs(5), || {
            queue.processor().processed.load(Ordering::SeqCst) == 20
        }));
        assert!(queue.processor().completed.load(Ordering::SeqCst) >= 5);

        queue.stop();
        assert!(queue.is_idle());
    }

    #[test]
    fn test_start_twice() {
        let queue = ProcessingQueue::with_config(
            Counting {
                processed: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
            },
            &QueueConfig::new().with_consumer_count(1),
            None,
        )
        .unwrap();
        queue.start().unwrap();
        assert_eq!(queue.start(), Err(QueueError::AlreadyStarted));
        queue.stop();
    }

    #[test]
    fn test_consumer_count_defaults_to_batch_size() {
        let queue = ProcessingQueue::new(Counting {
            processed: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        });
        assert_eq!(queue.max_processing_size(), 4);
        assert_eq!(queue.consumer_count(), 4);
    }

    #[test]
    fn test_spawn_failure_joins_spawned_threads() {
        let release = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicUsize::new(0));

        let result = spawn_all(
            "flaky",
            4,
            |index| {
                if index == 2 {
                    return Err(io::Error::other("refused"));
                }
                let release = Arc::clone(&release);
                let exited = Arc::clone(&exited);
                thread::Builder::new().spawn(move || {
                    while !release.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(1));
                    }
                    exited.fetch_add(1, Ordering::SeqCst);
                })
            },
            || release.store(true, Ordering::SeqCst),
        );

        assert!(matches!(result, Err(QueueError::Spawn(msg)) if msg == "refused"));
        assert_eq!(exited.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_spawn_all_success() {
        let handles = spawn_all("steady", 3, |_| thread::Builder::new().spawn(|| {}), || {
            panic!("halt must not run");
        })
        .unwrap();
        assert_eq!(handles.len(), 3);
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
