//! Infrastructure adapters for queue storage.

pub mod queue;
