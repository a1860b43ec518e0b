//! Tracing setup for applications and tests embedding the queues.
//!
//! Queues only emit `tracing` events. Nothing is printed until a subscriber
//! is installed, either by the application or through these helpers.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `warn`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    init_tracing_with_default("warn");
}

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directives` (e.g. `"priority_batch_queue=debug"`).
///
/// Thread names are included since every consumer thread is named after its queue.
pub fn init_tracing_with_default(default_directives: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
