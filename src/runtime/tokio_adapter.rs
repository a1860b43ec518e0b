//! Tokio adapters for async processing contracts.
//!
//! Consumers are plain OS threads, so an async contract cannot be awaited
//! directly. [`BlockOn`] wraps one and drives each call to completion on a
//! tokio runtime through its [`Handle`]. The consumer thread blocks for the
//! duration of the call, exactly as it would for a synchronous contract.
//!
//! `Handle::block_on` panics when called from inside an async context, which
//! never happens for consumer, pump or pool threads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::{Handle, Runtime};
use tracing::warn;

use crate::core::{Persister, Processor, Transferer, DEFAULT_PROCESSING_TIMEOUT};

/// Async counterpart of [`Processor`].
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
///
/// struct Mailer;
///
/// #[async_trait]
/// impl AsyncProcessor<Email> for Mailer {
///     fn max_processing_size(&self) -> usize { 50 }
///
///     async fn process(&self, items: &[Email]) {
///         smtp::send_all(items).await;
///     }
/// }
///
/// let queue = ProcessingQueue::new(BlockOn::new(Mailer, Handle::current()));
/// ```
#[async_trait]
pub trait AsyncProcessor<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Upper bound on the batch handed to [`process`](Self::process).
    fn max_processing_size(&self) -> usize;

    /// Process one batch.
    async fn process(&self, items: &[T]);

    /// Wait bound for a batch in blocking pump mode.
    fn processing_timeout(&self) -> Duration {
        DEFAULT_PROCESSING_TIMEOUT
    }

    /// Called after every batch cycle.
    async fn processing_completed(&self, _items: &[T]) {}
}

/// Async counterpart of [`Persister`].
#[async_trait]
pub trait AsyncPersister<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Persist a batch. `false` sends the whole batch back.
    async fn persist(&self, items: &[T]) -> bool;

    /// Largest batch handed to [`persist`](Self::persist).
    fn max_processing_size(&self) -> usize;
}

/// Async counterpart of [`Transferer`].
#[async_trait]
pub trait AsyncTransferer<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Transfer a single item. `false` requeues it.
    async fn transfer(&self, item: &T) -> bool;

    /// Largest batch fanned out at once.
    fn max_processing_size(&self) -> usize;

    /// Per-item wait bound.
    fn timeout(&self) -> Duration;
}

/// Runs an async contract on a tokio runtime so it plugs in as the sync one.
pub struct BlockOn<A> {
    inner: Arc<A>,
    handle: Handle,
    // owned runtime, if any; must not be dropped inside an async context
    _runtime: Option<Runtime>,
}

impl<A> BlockOn<A> {
    /// Drive `inner` on an existing runtime.
    pub fn new(inner: A, handle: Handle) -> Self {
        Self {
            inner: Arc::new(inner),
            handle,
            _runtime: None,
        }
    }

    /// Drive `inner` on a dedicated multi-threaded runtime owned by the adapter.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the runtime cannot be built.
    pub fn with_worker_threads(inner: A, worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("block-on-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            inner: Arc::new(inner),
            handle: runtime.handle().clone(),
            _runtime: Some(runtime),
        })
    }

    /// The wrapped async contract.
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Handle of the runtime driving the contract.
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl<T, A> Processor<T> for BlockOn<A>
where
    T: Send + Sync + 'static,
    A: AsyncProcessor<T>,
{
    fn max_processing_size(&self) -> usize {
        self.inner.max_processing_size()
    }

    fn process(&self, items: &[T]) {
        self.handle.block_on(self.inner.process(items));
    }

    fn processing_timeout(&self) -> Duration {
        self.inner.processing_timeout()
    }

    fn processing_completed(&self, items: &[T]) {
        self.handle.block_on(self.inner.processing_completed(items));
    }
}

impl<T, A> Persister<T> for BlockOn<A>
where
    T: Send + Sync + 'static,
    A: AsyncPersister<T>,
{
    fn persist(&self, items: &[T]) -> bool {
        self.handle.block_on(self.inner.persist(items))
    }

    fn max_processing_size(&self) -> usize {
        self.inner.max_processing_size()
    }
}

impl<T, A> Transferer<T> for BlockOn<A>
where
    T: Send + Sync + 'static,
    A: AsyncTransferer<T>,
{
    /// Awaits the transfer under [`AsyncTransferer::timeout`], so a transfer
    /// that overruns is dropped instead of holding its pool thread.
    fn transfer(&self, item: &T) -> bool {
        let timeout = self.inner.timeout();
        self.handle.block_on(async {
            if let Ok(transferred) = tokio::time::timeout(timeout, self.inner.transfer(item)).await {
                transferred
            } else {
                warn!(timeout_ms = timeout.as_millis(), "async transfer timed out");
                false
            }
        })
    }

    fn max_processing_size(&self) -> usize {
        self.inner.max_processing_size()
    }

    fn timeout(&self) -> Duration {
        self.inner.timeout()
    }
}
