//! Diagnostic tracing for the agent.
//!
//! - **Tracing (this module)**: developer diagnostics via `RUST_LOG`, written to
//!   stderr. Not persisted.
//! - **Attempt records (`io/attempt_log`)**: per-round artifacts under the state
//!   directory. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. Reads `RUST_LOG`, defaulting to `warn`.
///
/// ```bash
/// RUST_LOG=pipewright=debug pipewright run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
