//! Configuration models for queues, pumps and pipelines.

pub mod queue;

pub use queue::{PipelineConfig, PumpingConfig, QueueConfig, Synchronization};
