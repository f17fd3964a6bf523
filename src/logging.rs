//! Log output for embedders that do not bring their own subscriber

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a fmt subscriber filtered by `RUST_LOG`, or by the configured
/// level when `RUST_LOG` is unset or invalid.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .try_init()
        .is_ok()
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}
