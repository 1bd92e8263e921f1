//! # Structured Logging Module
//!
//! Environment-filtered structured logging for the mediation layer. Host
//! applications that already install a `tracing` subscriber can skip this
//! entirely; `init_logging` is a no-op when a global subscriber exists.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize console logging driven by `RUST_LOG` (default level: `info`).
///
/// Safe to call more than once; only the first call has any effect, and a
/// subscriber installed by the host process wins silently.
pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_level(true))
            .with(filter)
            .try_init();
    });
}
