//! Core queue, consumer and execution abstractions.

pub mod error;
pub mod fan_out;
pub mod pipeline;
pub mod processing_queue;
pub mod processor;
pub mod pumping_queue;
pub mod task_pool;
pub mod work_queue;

pub use error::{AppResult, QueueError};
pub use fan_out::{fan_out, ItemFailure, ItemHandler, ParallelProcessor};
pub use pipeline::{Stage, StagedPipeline};
pub use processing_queue::ProcessingQueue;
pub use processor::{
    default_processing_size, Persister, Processor, Transferer, DEFAULT_PROCESSING_TIMEOUT,
};
pub use pumping_queue::PumpingQueue;
pub use task_pool::{TaskHandle, TaskPool};
pub use work_queue::{
    Admission, CompletionListener, EnqueueReport, ListenerId, PriorityWorkQueue, QueueStats,
};
