//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Installs a JSON `fmt` subscriber. `RUST_LOG` takes precedence over `level`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(false)
        .try_init();
}
