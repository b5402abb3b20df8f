//! Development-time tracing for debugging the runner.
//!
//! Tracing is for diagnostics only (`RUST_LOG`, stderr). Product output such as
//! session progress and verification summaries is printed by the CLI, and
//! product artifacts are written under `.a1/`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr in compact format.
///
/// ```bash
/// RUST_LOG=a1=debug a1 start
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (e.g. the dashboard embedding the library) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
