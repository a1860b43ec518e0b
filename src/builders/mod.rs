pub mod queue_builder;

pub use queue_builder::{PipelineBuilder, ProcessingQueueBuilder, PumpingQueueBuilder};
