//! Tracing initialization for embedding applications.
//!
//! The repository layer logs through `log` macros and the sync engine
//! through `tracing` spans; `init` installs a subscriber that captures
//! both. Libraries must not force a subscriber on their host, so this
//! is opt-in and idempotent.

use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber with env-filter (RUST_LOG) and bridges
/// `log` records into tracing. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let _ = LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
