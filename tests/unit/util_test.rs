//! Tests for utility functions

use priority_batch_queue::util::{init_tracing, init_tracing_with_default};

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing_with_default("priority_batch_queue=debug");
    init_tracing();
    tracing::info!(queue = "unit", "subscriber installed");
}
