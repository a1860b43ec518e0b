//! Runtime adapters for async collaborators.

pub mod tokio_adapter;

pub use tokio_adapter::{AsyncPersister, AsyncProcessor, AsyncTransferer, BlockOn};
