//! Log output for the binary.
//!
//! The library logs through the `log` facade. Installing the subscriber also
//! installs the `log` bridge, so those records and the HTTP request spans from
//! `tower-http` end up in one stream.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when the filter string is empty or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Builds the filter from `level`, which may be a bare level (`debug`) or a
/// full directive (`netgate=trace,tower_http=debug`).
pub fn filter_for(level: &str) -> EnvFilter {
    let level = level.trim();
    if level.is_empty() {
        return EnvFilter::new(DEFAULT_FILTER);
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize logging with the given filter.
///
/// Returns `Err` if a subscriber is already installed.
pub fn try_init(level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}
