//! # Priority Batch Queue
//!
//! Priority-ordered work queues drained in batches by pools of OS threads.
//!
//! Collaborators enqueue items and supply a processing contract; the queue
//! takes care of ordering, backpressure, batching, failure requeue and telling
//! interested parties when all work has drained.
//!
//! ## Key Features
//!
//! - **Priority draining**: an optional comparator orders the queue, smallest
//!   first; equal items keep insertion order
//! - **Duplicate suppression**: an item equal to one already queued is ignored
//! - **Backpressure**: an optional size limit rejects admission instead of dropping
//! - **Idle signaling**: completion listeners fire once per busy-to-idle transition
//! - **At-least-once retries**: failed work goes back into the queue, unbounded
//! - **Staged pipeline**: persist batches, then transfer each item concurrently
//!   under a per-item timeout
//!
//! ## ProcessingQueue
//!
//! ```rust,ignore
//! use priority_batch_queue::builders::ProcessingQueueBuilder;
//! use priority_batch_queue::core::Processor;
//!
//! struct PushSender;
//!
//! impl Processor<Notification> for PushSender {
//!     fn max_processing_size(&self) -> usize { 100 }
//!
//!     fn process(&self, items: &[Notification]) {
//!         gateway::send_all(items);
//!     }
//! }
//!
//! let queue = ProcessingQueueBuilder::new()
//!     .name("push")
//!     .max_size(50_000)
//!     .comparator(|a: &Notification, b: &Notification| b.urgency.cmp(&a.urgency))
//!     .build(PushSender)?;
//! queue.start()?;
//! queue.enqueue(notification)?;
//! ```
//!
//! ## StagedPipeline
//!
//! ```rust,ignore
//! use priority_batch_queue::core::{StagedPipeline, Stage};
//!
//! let pipeline = StagedPipeline::new(MessageStore, MessageRelay)?;
//! pipeline.start()?;
//! pipeline.enqueue_for_persisting(message)?;
//!
//! pipeline.signal_shutdown();
//! while !pipeline.is_idle() { /* drain */ }
//! pipeline.stop();
//! ```
//!
//! For complete usage, see `tests/processing_queue_test.rs` and
//! `tests/pipeline_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core queue, consumer and execution abstractions.
pub mod core;
/// Configuration models for queues, pumps and pipelines.
pub mod config;
/// Builders to construct queues and pipelines from configuration.
pub mod builders;
/// Infrastructure adapters for queue storage.
pub mod infra;
/// Runtime adapters for async collaborators.
#[cfg(feature = "tokio-runtime")]
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::builders::{PipelineBuilder, ProcessingQueueBuilder, PumpingQueueBuilder};
pub use crate::config::{PipelineConfig, PumpingConfig, QueueConfig, Synchronization};
pub use crate::core::{
    Admission, CompletionListener, EnqueueReport, ItemFailure, ItemHandler, ListenerId,
    ParallelProcessor, Persister, PriorityWorkQueue, ProcessingQueue, Processor, PumpingQueue,
    QueueError, QueueStats, Stage, StagedPipeline, TaskHandle, TaskPool, Transferer,
};
