//! Per-item concurrent execution with a bounded wait.
//!
//! Every item of a batch becomes its own [`TaskPool`] task. All tasks are
//! submitted before any is awaited, then the results are joined against a
//! single deadline of `timeout` after submission. Items that returned `false`,
//! panicked, or missed the deadline come back as one failure list; there is no
//! error-based control flow.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::core::processor::{effective_processing_size, DEFAULT_PROCESSING_TIMEOUT};
use crate::core::{Processor, QueueError, TaskHandle, TaskPool};

/// Why a single item's task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFailure {
    /// The work function returned `false`.
    Returned,
    /// The task did not finish before the deadline.
    Timeout,
    /// The task panicked or could not be submitted.
    Execution(String),
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Returned => write!(f, "returned false"),
            Self::Timeout => write!(f, "timed out"),
            Self::Execution(msg) => write!(f, "execution failed: {msg}"),
        }
    }
}

impl From<QueueError> for ItemFailure {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Timeout => Self::Timeout,
            QueueError::Execution(msg) => Self::Execution(msg),
            other => Self::Execution(other.to_string()),
        }
    }
}

/// Run `work` once per item on `pool` and collect the items that failed.
pub fn fan_out<T, F>(pool: &TaskPool, items: &[T], timeout: Duration, work: &Arc<F>) -> Vec<(T, ItemFailure)>
where
    T: Clone + Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    let submitted: Vec<(T, Result<TaskHandle<bool>, QueueError>)> = items
        .iter()
        .map(|item| {
            let target = item.clone();
            let work = Arc::clone(work);
            (item.clone(), pool.submit(move || work(&target)))
        })
        .collect();

    let deadline = Instant::now() + timeout;
    let mut failures = Vec::new();

    for (item, handle) in submitted {
        let outcome = handle.and_then(|h| h.wait_timeout(deadline.saturating_duration_since(Instant::now())));
        match outcome {
            Ok(true) => {}
            Ok(false) => failures.push((item, ItemFailure::Returned)),
            Err(e) => failures.push((item, ItemFailure::from(e))),
        }
    }

    debug!(
        total = items.len(),
        failed = failures.len(),
        "fan-out finished"
    );
    failures
}

/// Per-item contract for [`ParallelProcessor`].
pub trait ItemHandler<T>: Send + Sync + 'static {
    /// Process one item. `false` reports a business failure.
    fn process_item(&self, item: &T) -> bool;

    /// Called for every item that did not succeed, with the reason.
    fn item_failed(&self, item: &T, failure: &ItemFailure);

    /// Largest batch fanned out at once. Zero selects the default.
    fn max_processing_size(&self) -> usize {
        0
    }

    /// Per-item wait bound.
    fn processing_timeout(&self) -> Duration {
        DEFAULT_PROCESSING_TIMEOUT
    }

    /// Called after every batch.
    fn processing_completed(&self, _items: &[T]) {}
}

/// [`Processor`] that runs every item of a batch on its own pool thread.
pub struct ParallelProcessor<T, H> {
    handler: Arc<H>,
    pool: TaskPool,
    _item: PhantomData<fn(T)>,
}

impl<T, H> ParallelProcessor<T, H>
where
    H: ItemHandler<T>,
{
    /// Create a processor with a pool of twice the CPU count.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Spawn`] if the pool threads cannot be started.
    pub fn new(handler: H) -> Result<Self, QueueError> {
        Self::with_threads(handler, num_cpus::get().max(1) * 2)
    }

    /// Create a processor with an explicit pool size.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidConfig`] if `threads` is 0
    /// - [`QueueError::Spawn`] if the pool threads cannot be started
    pub fn with_threads(handler: H, threads: usize) -> Result<Self, QueueError> {
        Ok(Self {
            handler: Arc::new(handler),
            pool: TaskPool::new("parallel-processor", threads)?,
            _item: PhantomData,
        })
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<T, H> Processor<T> for ParallelProcessor<T, H>
where
    T: Clone + Send + fmt::Debug + 'static,
    H: ItemHandler<T>,
{
    fn max_processing_size(&self) -> usize {
        effective_processing_size(self.handler.max_processing_size())
    }

    fn process(&self, items: &[T]) {
        debug!(batch_size = items.len(), "parallel processing started");

        let handler = Arc::clone(&self.handler);
        let work = Arc::new(move |item: &T| handler.process_item(item));
        let failures = fan_out(&self.pool, items, self.handler.processing_timeout(), &work);

        for (item, failure) in &failures {
            error!(item = ?item, failure = %failure, "processing item failed");
            self.handler.item_failed(item, failure);
        }
    }

    fn processing_timeout(&self) -> Duration {
        self.handler.processing_timeout()
    }

    fn processing_completed(&self, items: &[T]) {
        self.handler.processing_completed(items);
    }
}
