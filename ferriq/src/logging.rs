//! Tracing setup for the broker binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. Filtering follows `RUST_LOG`; without
/// it, debug builds trace and release builds report at info level.
pub fn init() {
    let fallback = if cfg!(debug_assertions) {
        "ferriq=trace,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false))
        .init();
}
