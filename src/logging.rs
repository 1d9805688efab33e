//! Tracing setup for applications embedding a wizard

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a JSON `tracing` subscriber filtered by `RUST_LOG`, falling back
/// to `default_filter` (e.g. `"wizard_flow=info"`).
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init_tracing(default_filter: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .try_init()
}
