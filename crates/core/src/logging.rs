//! Structured logging for custody services.
//!
//! Log level is configured via the `RUST_LOG` environment variable and
//! defaults to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize human-readable logging.
///
/// # Example
/// ```no_run
/// use custody_core::logging;
///
/// logging::init();
/// tracing::info!("custody node started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Initialize JSON logging for log aggregation.
///
/// # Example
/// ```no_run
/// use custody_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "custody-node", "Service started");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_target(true).with_thread_ids(true))
        .init();
}

/// Pick the output format from configuration.
pub fn init_with(json: bool) {
    if json {
        init_json();
    } else {
        init();
    }
}
