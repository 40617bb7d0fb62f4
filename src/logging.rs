//! Tracing setup shared by the orchestrator and worker processes.
//!
//! Output always goes to stderr. A worker's stdout carries protocol frames,
//! and a worker's stderr is inherited from the orchestrator, so both tiers
//! log to the same terminal.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the config file sets one
pub const DEFAULT_FILTER: &str = "warn";

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over `configured`, which wins over [`DEFAULT_FILTER`].
/// Calling this twice is harmless; the second call is ignored.
///
/// # Example
/// ```bash
/// RUST_LOG=conclave=debug conclave --oracle heuristic
/// ```
pub fn init(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
