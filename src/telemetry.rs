//! Log subscriber setup for binaries and services embedding the crate.
//!
//! The library itself only emits `tracing` events; nothing is printed unless
//! the host installs a subscriber, for instance with [`init`].

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,comprobantes=debug";

/// Install a JSON subscriber filtered by `RUST_LOG`.
///
/// Later calls are no-ops.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Like [`init`] with a different fallback filter.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .with_current_span(false)
        .try_init();
}
