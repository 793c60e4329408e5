//! Error types for the chain integration.

use blockwatch_engine::EngineError;

use crate::config::ConfigError;

/// Errors raised by chain clients and the watcher bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// An RPC call failed upstream.
    #[error("chain rpc {method} failed: {message}")]
    Rpc {
        method: &'static str,
        message: String,
    },

    /// The watcher configuration is unusable.
    #[error("chain config error: {0}")]
    Config(#[from] ConfigError),

    /// Wiring the engine failed.
    #[error("chain engine error: {0}")]
    Engine(#[from] EngineError),
}

impl ChainError {
    pub fn rpc(method: &'static str, message: impl Into<String>) -> Self {
        Self::Rpc {
            method,
            message: message.into(),
        }
    }
}
