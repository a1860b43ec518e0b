//! Single-pump variant: one thread drains batches into an execution pool.
//!
//! The pump parks on the queue, drains a batch and submits
//! `process` + `processing_completed` to a [`TaskPool`]. What happens next
//! depends on [`Synchronization`]:
//!
//! - `Blocking`: the pump waits up to `processing_timeout()` for the batch. A
//!   timeout or a panic puts the whole batch back into the queue.
//! - `NonBlocking`: the pump goes straight back to the queue. Batches in
//!   flight are only counted.
//!
//! A batch stays outstanding (for idle detection) until its task finishes, or
//! until the pump gives up on it and requeues it.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::{PumpingConfig, Synchronization};
use crate::core::processing_queue::CONSUMER_JOIN_TIMEOUT;
use crate::core::processor::effective_processing_size;
use crate::core::task_pool::{join_with_timeout, panic_message};
use crate::core::work_queue::BatchCompletion;
use crate::core::{
    Admission, CompletionListener, EnqueueReport, ListenerId, PriorityWorkQueue, Processor,
    QueueError, QueueStats, TaskHandle, TaskPool,
};
use crate::infra::queue::memory::Comparator;

/// Priority work queue drained by a single pump into an execution pool.
pub struct PumpingQueue<T, P> {
    queue: Arc<PriorityWorkQueue<T>>,
    processor: Arc<P>,
    pool: Arc<TaskPool>,
    synchronization: Synchronization,
    batch_size: usize,
    in_flight: Arc<AtomicUsize>,
    pump: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<T, P> PumpingQueue<T, P>
where
    T: PartialEq + Clone + Send + 'static,
    P: Processor<T>,
{
    /// Create a blocking pump with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Spawn`] if the execution pool cannot start.
    pub fn new(processor: P) -> Result<Self, QueueError> {
        Self::with_config(processor, &PumpingConfig::default(), None)
    }

    /// Create a pump from configuration.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidConfig`] if `config` fails validation
    /// - [`QueueError::Spawn`] if the execution pool cannot start
    pub fn with_config(
        processor: P,
        config: &PumpingConfig,
        comparator: Option<Comparator<T>>,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::InvalidConfig)?;

        let queue = PriorityWorkQueue::from_config(&config.queue, comparator);
        let pool = TaskPool::new(
            format!("{}-exec", queue.name()),
            config.effective_execution_threads(),
        )?;

        Ok(Self {
            batch_size: effective_processing_size(processor.max_processing_size()),
            queue: Arc::new(queue),
            processor: Arc::new(processor),
            pool: Arc::new(pool),
            synchronization: config.synchronization,
            in_flight: Arc::new(AtomicUsize::new(0)),
            pump: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Spawn the pump thread.
    ///
    /// # Errors
    ///
    /// - [`QueueError::AlreadyStarted`] on a second call
    /// - [`QueueError::Spawn`] if the pump thread cannot be created
    pub fn start(&self) -> Result<(), QueueError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(QueueError::AlreadyStarted);
        }

        let pump = Pump {
            queue: Arc::clone(&self.queue),
            processor: Arc::clone(&self.processor),
            pool: Arc::clone(&self.pool),
            synchronization: self.synchronization,
            batch_size: self.batch_size,
            in_flight: Arc::clone(&self.in_flight),
        };
        let handle = thread::Builder::new()
            .name(format!("{}-pump", self.queue.name()))
            .spawn(move || pump.run())
            .map_err(|e| QueueError::Spawn(e.to_string()))?;
        *self.pump.lock() = Some(handle);

        info!(
            queue = %self.queue.name(),
            synchronization = ?self.synchronization,
            max_processing_size = self.batch_size,
            "pumping queue started"
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

    /// Admit several items best-effort.
    pub fn enqueue_all<I>(&self, items: I) -> EnqueueReport<T>
    where
        I: IntoIterator<Item = T>,
    {
        self.queue.enqueue_all(items)
    }
}

impl<T, P> PumpingQueue<T, P> {
    /// Approximate number of batches submitted but not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Pump synchronization policy.
    pub const fn synchronization(&self) -> Synchronization {
        self.synchronization
    }

    /// Current number of queued items.
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    /// Whether nothing is queued and no batch is in flight.
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

    /// The underlying queue.
    pub const fn queue(&self) -> &Arc<PriorityWorkQueue<T>> {
        &self.queue
    }

    /// The processing contract.
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Stop the pump, join it, then shut the execution pool down.
    pub fn stop(&self) {
        self.queue.stop();
        if let Some(handle) = self.pump.lock().take() {
            join_with_timeout(self.queue.name(), vec![handle], CONSUMER_JOIN_TIMEOUT);
        }
        self.pool.shutdown(CONSUMER_JOIN_TIMEOUT);
        info!(queue = %self.queue.name(), "pumping queue stopped");
    }
}

impl<T, P> Drop for PumpingQueue<T, P> {
    fn drop(&mut self) {
        self.queue.stop();
    }
}

struct Pump<T, P> {
    queue: Arc<PriorityWorkQueue<T>>,
    processor: Arc<P>,
    pool: Arc<TaskPool>,
    synchronization: Synchronization,
    batch_size: usize,
    in_flight: Arc<AtomicUsize>,
}

impl<T, P> Pump<T, P>
where
    T: PartialEq + Clone + Send + 'static,
    P: Processor<T>,
{
    fn run(self) {
        debug!(queue = %self.queue.name(), "pump started");

        while let Some(batch) = self.queue.take_batch(self.batch_size) {
            let completion = Arc::new(BatchCompletion::new(Arc::clone(&self.queue)));
            let batch_size = batch.len();

            match self.synchronization {
                Synchronization::Blocking => {
                    let retry = batch.clone();
                    let outcome = self
                        .submit(batch, Arc::clone(&completion))
                        .and_then(|handle| handle.wait_timeout(self.processor.processing_timeout()));
                    if let Err(e) = outcome {
                        error!(
                            queue = %self.queue.name(),
                            batch_size,
                            error = %e,
                            "processing failed, so enqueued again"
                        );
                        self.queue.requeue(retry);
                    }
                    // no-op when the task already completed the batch
                    completion.complete();
                }
                Synchronization::NonBlocking => {
                    if let Err(e) = self.submit(batch, completion) {
                        error!(queue = %self.queue.name(), batch_size, error = %e, "batch submission failed");
                    }
                }
            }
        }

        debug!(queue = %self.queue.name(), "pump exiting");
    }

    fn submit(
        &self,
        batch: Vec<T>,
        completion: Arc<BatchCompletion<T>>,
    ) -> Result<TaskHandle<()>, QueueError> {
        let processor = Arc::clone(&self.processor);
        let queue_name = self.queue.name().to_string();

        // released when the task finishes, or is dropped unrun
        let in_flight = InFlightGuard::enter(&self.in_flight);
        self.pool.submit(move || {
            let _in_flight = in_flight;
            let outcome = catch_unwind(AssertUnwindSafe(|| processor.process(&batch)));
            processor.processing_completed(&batch);
            match outcome {
                Ok(()) => completion.complete(),
                Err(payload) => {
                    error!(
                        queue = %queue_name,
                        error = %panic_message(payload.as_ref()),
                        "processor panicked"
                    );
                    resume_unwind(payload);
                }
            }
        })
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
