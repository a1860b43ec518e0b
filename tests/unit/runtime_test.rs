//! Tests for tokio runtime adapters

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use priority_batch_queue::core::{Persister, Processor};
use priority_batch_queue::runtime::{AsyncPersister, AsyncProcessor, BlockOn};

struct Summer {
    total: AtomicUsize,
    completed: AtomicUsize,
}

#[async_trait]
impl AsyncProcessor<usize> for Summer {
    fn max_processing_size(&self) -> usize {
        8
    }

    async fn process(&self, items: &[usize]) {
        tokio::task::yield_now().await;
        self.total.fetch_add(items.iter().sum(), Ordering::SeqCst);
    }

    async fn processing_completed(&self, _items: &[usize]) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

struct EvenStore;

#[async_trait]
impl AsyncPersister<usize> for EvenStore {
    async fn persist(&self, items: &[usize]) -> bool {
        tokio::time::sleep(Duration::from_millis(1)).await;
        items.len() % 2 == 0
    }

    fn max_processing_size(&self) -> usize {
        4
    }
}

#[test]
fn test_block_on_processor() {
    let adapter = BlockOn::with_worker_threads(
        Summer {
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        },
        1,
    )
    .unwrap();

    Processor::process(&adapter, &[1, 2, 3]);
    Processor::processing_completed(&adapter, &[1, 2, 3]);

    assert_eq!(adapter.inner().total.load(Ordering::SeqCst), 6);
    assert_eq!(adapter.inner().completed.load(Ordering::SeqCst), 1);
    assert_eq!(Processor::<usize>::max_processing_size(&adapter), 8);
}

#[test]
fn test_block_on_persister() {
    let adapter = BlockOn::with_worker_threads(EvenStore, 1).unwrap();
    assert!(Persister::persist(&adapter, &[1, 2]));
    assert!(!Persister::persist(&adapter, &[1]));
}
