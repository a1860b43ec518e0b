//! Tests for queue and pipeline builders

use std::time::Duration;

use priority_batch_queue::builders::{PipelineBuilder, ProcessingQueueBuilder, PumpingQueueBuilder};
use priority_batch_queue::config::{QueueConfig, Synchronization};
use priority_batch_queue::core::{Persister, Processor, QueueError, Stage, Transferer};

struct Noop;

impl Processor<u32> for Noop {
    fn max_processing_size(&self) -> usize {
        5
    }

    fn process(&self, _items: &[u32]) {}
}

struct NoopStore;

impl Persister<u32> for NoopStore {
    fn persist(&self, _items: &[u32]) -> bool {
        true
    }

    fn max_processing_size(&self) -> usize {
        2
    }
}

struct NoopRelay;

impl Transferer<u32> for NoopRelay {
    fn transfer(&self, _item: &u32) -> bool {
        true
    }

    fn max_processing_size(&self) -> usize {
        2
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }
}

#[test]
fn test_processing_builder_applies_settings() {
    let queue = ProcessingQueueBuilder::new()
        .name("built")
        .max_size(2)
        .consumer_count(3)
        .comparator(|a: &u32, b: &u32| b.cmp(a))
        .build(Noop)
        .unwrap();

    assert_eq!(queue.queue().name(), "built");
    assert_eq!(queue.consumer_count(), 3);
    assert_eq!(queue.max_processing_size(), 5);

    queue.enqueue(1).unwrap();
    queue.enqueue(9).unwrap();
    assert_eq!(
        queue.enqueue(4),
        Err(QueueError::CapacityExceeded { max_size: 2 })
    );
    // descending comparator: largest first
    assert_eq!(queue.queue().poll_up_to(2), vec![9, 1]);
}

#[test]
fn test_processing_builder_rejects_invalid_config() {
    let result = ProcessingQueueBuilder::<u32>::new()
        .config(QueueConfig::new().with_consumer_count(0))
        .build(Noop);
    assert!(matches!(result, Err(QueueError::InvalidConfig(_))));
}

#[test]
fn test_pumping_builder_applies_settings() {
    let pump = PumpingQueueBuilder::new()
        .name("pump")
        .synchronization(Synchronization::NonBlocking)
        .execution_threads(2)
        .build(Noop)
        .unwrap();

    assert_eq!(pump.synchronization(), Synchronization::NonBlocking);
    assert_eq!(pump.queue().name(), "pump");
    assert_eq!(pump.in_flight(), 0);
}

#[test]
fn test_pipeline_builder_per_stage_settings() {
    let pipeline = PipelineBuilder::new()
        .persist(QueueConfig::new().with_name("persist").with_consumer_count(1))
        .transfer(QueueConfig::new().with_name("transfer").with_max_size(1).with_consumer_count(1))
        .transfer_comparator(|a: &u32, b: &u32| a.cmp(b))
        .build(NoopStore, NoopRelay)
        .unwrap();

    assert_eq!(pipeline.stats(Stage::Persist).name, "persist");
    assert_eq!(pipeline.stats(Stage::Transfer).name, "transfer");

    pipeline.enqueue_for_transferring(1).unwrap();
    assert!(pipeline.enqueue_for_transferring(2).is_err());
    assert_eq!(pipeline.size(Stage::Transfer), 1);
}
