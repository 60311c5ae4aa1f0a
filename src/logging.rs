//! Tracing subscriber setup for daemon binaries and tests.

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. The filter comes from `RUST_LOG`,
/// falling back to `info`. Calling this more than once (tests, embedded
/// use) is harmless; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
