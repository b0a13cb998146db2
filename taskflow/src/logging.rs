//! Process-wide tracing setup.
//!
//! Reads `RUST_LOG`; when unset, `default_directive` applies. Output goes to
//! stderr in the compact format.
//!
//! # Example
//! ```bash
//! RUST_LOG=taskflow=debug,taskflow_server=debug taskflow-server
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once, early in `main`.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
