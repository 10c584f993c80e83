//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither RUST_LOG nor the configured level parses.
pub const DEFAULT_FILTER: &str = "info";

/// Build the filter: RUST_LOG wins, then `level` from config.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Logs go to stderr so stdout stays the driver's report.
pub fn init(level: &str) {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(console)
        .try_init();
}
