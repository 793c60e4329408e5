//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the global tracing subscriber described by `config`.
///
/// An unparsable level falls back to `info`. Returns `false` if a global
/// subscriber was already installed, in which case that one stays.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    match result {
        Ok(()) => {
            tracing::debug!(level = %config.level, json = config.json, "tracing initialized");
            true
        }
        Err(_) => false,
    }
}
