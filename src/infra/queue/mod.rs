//! Queue storage backends.

pub mod memory;

pub use memory::{Comparator, OrderedBuffer};
