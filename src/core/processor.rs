//! Collaborator-supplied processing contracts.
//!
//! The queue infrastructure only distinguishes "retry" from "done". Business
//! failures are reported through return values (or, for [`Processor`], through
//! the collaborator's own bookkeeping such as calling
//! [`PriorityWorkQueue::requeue`](crate::core::PriorityWorkQueue::requeue)).
//! Contracts are called from consumer threads and must be `Send + Sync`.

use std::time::Duration;

/// Wait bound used when a contract does not override its timeout.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

/// Batch size used when a contract reports 0: four batches' worth per CPU.
#[must_use]
pub fn default_processing_size() -> usize {
    num_cpus::get().max(1) * 4
}

/// Batch processing contract consumed by
/// [`ProcessingQueue`](crate::core::ProcessingQueue) and
/// [`PumpingQueue`](crate::core::PumpingQueue).
///
/// # Example
///
/// ```rust,ignore
/// struct PushSender;
///
/// impl Processor<Notification> for PushSender {
///     fn max_processing_size(&self) -> usize { 100 }
///
///     fn process(&self, items: &[Notification]) {
///         for n in items {
///             send(n);
///         }
///     }
/// }
/// ```
pub trait Processor<T>: Send + Sync + 'static {
    /// Upper bound on the batch handed to [`process`](Self::process).
    /// Zero selects [`default_processing_size`].
    fn max_processing_size(&self) -> usize;

    /// Process one batch. Expected failures must not panic.
    fn process(&self, items: &[T]);

    /// Wait bound for a batch in blocking pump mode and for per-item fan-out.
    fn processing_timeout(&self) -> Duration {
        DEFAULT_PROCESSING_TIMEOUT
    }

    /// Called after every batch cycle, whether `process` succeeded or not.
    fn processing_completed(&self, _items: &[T]) {}
}

/// First stage of a [`StagedPipeline`](crate::core::StagedPipeline).
pub trait Persister<T>: Send + Sync + 'static {
    /// Persist a batch. `false` sends the whole batch back for another attempt.
    fn persist(&self, items: &[T]) -> bool;

    /// Largest batch handed to [`persist`](Self::persist). Zero selects the default.
    fn max_processing_size(&self) -> usize;
}

/// Second stage of a [`StagedPipeline`](crate::core::StagedPipeline).
pub trait Transferer<T>: Send + Sync + 'static {
    /// Transfer a single item. `false` requeues just this item.
    fn transfer(&self, item: &T) -> bool;

    /// Largest batch fanned out at once. Zero selects the default.
    fn max_processing_size(&self) -> usize;

    /// Per-item wait bound; a transfer still running after it counts as failed.
    fn timeout(&self) -> Duration;
}

/// Resolve a contract's reported batch size, substituting the default for 0.
pub(crate) fn effective_processing_size(reported: usize) -> usize {
    if reported > 0 {
        reported
    } else {
        default_processing_size()
    }
}
