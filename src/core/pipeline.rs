//! Two-stage pipeline: a persist stage feeding a transfer stage.
//!
//! Every item moves through
//! `enqueued-for-persist -> persisted -> enqueued-for-transfer -> transferred`.
//!
//! - The persist stage hands whole batches to a [`Persister`]. A `false` (or a
//!   panic) puts the batch back into the persist stage; `true` forwards it to
//!   the transfer stage.
//! - The transfer stage fans every item of a batch out to its own pool task
//!   and waits up to [`Transferer::timeout`] from submission. Items that
//!   returned `false`, panicked or timed out go back into the transfer stage.
//!   The transfer pool is cached, so a transfer that never returns holds one
//!   thread and the rest of the stage keeps moving.
//!
//! Retries are unbounded. Forwarding and retries bypass the shutdown gate, so
//! a shutdown signal only stops collaborators from adding new work.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::core::fan_out::fan_out;
use crate::core::processing_queue::CONSUMER_JOIN_TIMEOUT;
use crate::core::processor::effective_processing_size;
use crate::core::task_pool::panic_message;
use crate::core::{
    Admission, CompletionListener, EnqueueReport, ListenerId, Persister, PriorityWorkQueue,
    ProcessingQueue, Processor, QueueError, QueueStats, TaskPool, Transferer,
};
use crate::infra::queue::memory::Comparator;

/// Upper bound on the transfer pool's threads.
pub const MAX_TRANSFER_THREADS: usize = 1024;

/// How long an idle transfer thread waits for work before exiting.
pub const TRANSFER_THREAD_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// One of the two pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Items waiting to be persisted.
    Persist,
    /// Items persisted and waiting to be transferred.
    Transfer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persist => write!(f, "persist"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

struct PersistStage<T, Ps> {
    persister: Ps,
    persist: Arc<PriorityWorkQueue<T>>,
    transfer: Arc<PriorityWorkQueue<T>>,
}

impl<T, Ps> Processor<T> for PersistStage<T, Ps>
where
    T: PartialEq + Clone + Send + 'static,
    Ps: Persister<T>,
{
    fn max_processing_size(&self) -> usize {
        self.persister.max_processing_size()
    }

    fn process(&self, items: &[T]) {
        let persisted = match catch_unwind(AssertUnwindSafe(|| self.persister.persist(items))) {
            Ok(persisted) => persisted,
            Err(payload) => {
                error!(
                    queue = %self.persist.name(),
                    error = %panic_message(payload.as_ref()),
                    "persister panicked"
                );
                false
            }
        };

        if persisted {
            self.transfer.forward(items.iter().cloned());
        } else {
            warn!(
                queue = %self.persist.name(),
                batch_size = items.len(),
                "persisting failed, so enqueued again"
            );
            self.persist.requeue(items.iter().cloned());
        }
    }
}

struct TransferStage<T, Tr> {
    transferer: Arc<Tr>,
    transfer: Arc<PriorityWorkQueue<T>>,
    pool: TaskPool,
}

impl<T, Tr> Processor<T> for TransferStage<T, Tr>
where
    T: PartialEq + Clone + Send + 'static,
    Tr: Transferer<T>,
{
    fn max_processing_size(&self) -> usize {
        self.transferer.max_processing_size()
    }

    fn process(&self, items: &[T]) {
        let transferer = Arc::clone(&self.transferer);
        let work = Arc::new(move |item: &T| transferer.transfer(item));
        let failures = fan_out(&self.pool, items, self.transferer.timeout(), &work);
        if failures.is_empty() {
            return;
        }

        for (_, failure) in &failures {
            error!(queue = %self.transfer.name(), failure = %failure, "transferring item failed");
        }
        warn!(
            queue = %self.transfer.name(),
            failed = failures.len(),
            batch_size = items.len(),
            "failed transfers enqueued again"
        );
        self.transfer
            .requeue(failures.into_iter().map(|(item, _)| item));
    }

    fn processing_timeout(&self) -> std::time::Duration {
        self.transferer.timeout()
    }
}

/// Completion listener registered on both stages. Passes an idle signal on
/// only when both stages are idle, once per batch of intake.
struct PipelineListener<T> {
    persist: Weak<PriorityWorkQueue<T>>,
    transfer: Weak<PriorityWorkQueue<T>>,
    inner: Arc<dyn CompletionListener>,
    announced_at: Mutex<Option<u64>>,
}

impl<T: Send> CompletionListener for PipelineListener<T> {
    fn task_completed(&self, safe_to_shutdown: bool) {
        let (Some(persist), Some(transfer)) = (self.persist.upgrade(), self.transfer.upgrade())
        else {
            return;
        };

        {
            let mut announced_at = self.announced_at.lock();
            if !(persist.is_idle() && transfer.is_idle()) {
                return;
            }
            let intake = persist.intake() + transfer.intake();
            if *announced_at == Some(intake) {
                return;
            }
            *announced_at = Some(intake);
        }
        self.inner.task_completed(safe_to_shutdown);
    }
}

/// Persist stage chained into a transfer stage, each with its own consumers.
pub struct StagedPipeline<T, Ps, Tr> {
    persist: ProcessingQueue<T, PersistStage<T, Ps>>,
    transfer: ProcessingQueue<T, TransferStage<T, Tr>>,
    // persist-stage id handed out -> transfer-stage id of the same listener
    listeners: Mutex<Vec<(ListenerId, ListenerId)>>,
}

impl<T, Ps, Tr> StagedPipeline<T, Ps, Tr>
where
    T: PartialEq + Clone + Send + 'static,
    Ps: Persister<T>,
    Tr: Transferer<T>,
{
    /// Create a pipeline with default settings and FIFO stages.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConfig`] if the default configuration
    /// fails validation.
    pub fn new(persister: Ps, transferer: Tr) -> Result<Self, QueueError> {
        Self::with_config(persister, transferer, &PipelineConfig::default(), None, None)
    }

    /// Create a pipeline from configuration and optional per-stage comparators.
    ///
    /// The transfer pool starts a thread per item whenever none is free, up
    /// to [`MAX_TRANSFER_THREADS`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConfig`] if `config` fails validation.
    pub fn with_config(
        persister: Ps,
        transferer: Tr,
        config: &PipelineConfig,
        persist_comparator: Option<Comparator<T>>,
        transfer_comparator: Option<Comparator<T>>,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::InvalidConfig)?;

        let persist_queue = Arc::new(PriorityWorkQueue::from_config(
            &config.persist,
            persist_comparator,
        ));
        let transfer_queue = Arc::new(PriorityWorkQueue::from_config(
            &config.transfer,
            transfer_comparator,
        ));

        let transfer_batch = effective_processing_size(transferer.max_processing_size());
        let transfer_consumers = config
            .transfer
            .consumer_count
            .unwrap_or(transfer_batch)
            .max(1);
        let pool = TaskPool::cached(
            format!("{}-transfer", transfer_queue.name()),
            MAX_TRANSFER_THREADS,
            TRANSFER_THREAD_KEEP_ALIVE,
        )?;

        let persist = ProcessingQueue::from_parts(
            Arc::clone(&persist_queue),
            PersistStage {
                persister,
                persist: Arc::clone(&persist_queue),
                transfer: Arc::clone(&transfer_queue),
            },
            config.persist.consumer_count,
        );
        let transfer = ProcessingQueue::from_parts(
            Arc::clone(&transfer_queue),
            TransferStage {
                transferer: Arc::new(transferer),
                transfer: transfer_queue,
                pool,
            },
            Some(transfer_consumers),
        );

        Ok(Self {
            persist,
            transfer,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Start the consumers of both stages.
    ///
    /// If the persist stage fails to start, the transfer stage is stopped
    /// again and the pipeline is left stopped.
    ///
    /// # Errors
    ///
    /// - [`QueueError::AlreadyStarted`] on a second call
    /// - [`QueueError::Spawn`] if a consumer thread cannot be created
    pub fn start(&self) -> Result<(), QueueError> {
        self.transfer.start()?;
        if let Err(e) = self.persist.start() {
            error!(error = %e, "persist stage failed to start, stopping transfer stage");
            self.transfer.stop();
            self.transfer.processor().pool.shutdown(CONSUMER_JOIN_TIMEOUT);
            return Err(e);
        }
        info!(
            persist = %self.persist.queue().name(),
            transfer = %self.transfer.queue().name(),
            "staged pipeline started"
        );
        Ok(())
    }

    /// Admit an item into the persist stage.
    ///
    /// # Errors
    ///
    /// Returns the admission failure (capacity or shutdown).
    pub fn enqueue_for_persisting(&self, item: T) -> Result<Admission, QueueError> {
        self.persist.enqueue(item)
    }

    /// Admit several items into the persist stage, best-effort.
    pub fn enqueue_all_for_persisting<I>(&self, items: I) -> EnqueueReport<T>
    where
        I: IntoIterator<Item = T>,
    {
        self.persist.enqueue_all(items)
    }

    /// Admit an already persisted item straight into the transfer stage.
    ///
    /// # Errors
    ///
    /// Returns the admission failure (capacity or shutdown).
    pub fn enqueue_for_transferring(&self, item: T) -> Result<Admission, QueueError> {
        self.transfer.enqueue(item)
    }

    /// Admit several already persisted items into the transfer stage, best-effort.
    pub fn enqueue_all_for_transferring<I>(&self, items: I) -> EnqueueReport<T>
    where
        I: IntoIterator<Item = T>,
    {
        self.transfer.enqueue_all(items)
    }

    /// Register a listener that fires when both stages are idle.
    ///
    /// Either stage going idle triggers the check, so the listener fires
    /// whichever stage drains last.
    pub fn add_completion_listener(&self, listener: Arc<dyn CompletionListener>) -> ListenerId {
        let shared: Arc<dyn CompletionListener> = Arc::new(PipelineListener {
            persist: Arc::downgrade(self.persist.queue()),
            transfer: Arc::downgrade(self.transfer.queue()),
            inner: listener,
            announced_at: Mutex::new(None),
        });
        let id = self.persist.add_completion_listener(Arc::clone(&shared));
        let transfer_id = self.transfer.add_completion_listener(shared);
        self.listeners.lock().push((id, transfer_id));
        id
    }
}

impl<T, Ps, Tr> StagedPipeline<T, Ps, Tr> {
    /// Number of items queued in `stage`.
    pub fn size(&self, stage: Stage) -> usize {
        match stage {
            Stage::Persist => self.persist.size(),
            Stage::Transfer => self.transfer.size(),
        }
    }

    /// Whether both stages are empty with no batch in progress.
    pub fn is_idle(&self) -> bool {
        self.persist.is_idle() && self.transfer.is_idle()
    }

    /// Stop collaborator admission into both stages.
    ///
    /// Forwarding from persist to transfer and retries keep flowing.
    pub fn signal_shutdown(&self) {
        self.persist.signal_shutdown();
        self.transfer.signal_shutdown();
    }

    /// Deregister a listener added with [`add_completion_listener`](Self::add_completion_listener).
    pub fn remove_completion_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(pos) = listeners.iter().position(|(held, _)| *held == id) else {
            return false;
        };
        let (persist_id, transfer_id) = listeners.remove(pos);
        self.persist.remove_completion_listener(persist_id);
        self.transfer.remove_completion_listener(transfer_id);
        true
    }

    /// Counter snapshot of one stage.
    pub fn stats(&self, stage: Stage) -> QueueStats {
        match stage {
            Stage::Persist => self.persist.stats(),
            Stage::Transfer => self.transfer.stats(),
        }
    }

    /// The persist contract.
    pub fn persister(&self) -> &Ps {
        &self.persist.processor().persister
    }

    /// The transfer contract.
    pub fn transferer(&self) -> &Tr {
        &self.transfer.processor().transferer
    }

    /// Stop both stages and the transfer pool. Queued items stay queued.
    pub fn stop(&self) {
        self.persist.stop();
        self.transfer.stop();
        self.transfer.processor().pool.shutdown(CONSUMER_JOIN_TIMEOUT);
        info!("staged pipeline stopped");
    }
}
