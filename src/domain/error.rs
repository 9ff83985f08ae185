// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend protocol error: {0}")]
    Protocol(String),

    #[error("Transaction reverted on-chain: {hash}")]
    Revert { hash: String },

    #[error("Nonce reservation violated: {0}")]
    Nonce(String),

    #[error("Gas budget error: {0}")]
    Gas(String),

    #[error("Allowance step failed: {0}")]
    Allowance(String),

    #[error("Sale limit reached: {0}")]
    Limit(String),

    #[error("Safety check failed: {0}")]
    Safety(String),

    #[error("Timed out waiting for receipt of {hash}")]
    Timeout { hash: String },

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl EngineError {
    /// Transient errors may be retried with backoff and endpoint/key rotation.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Network(_))
    }

    /// Errors that must never trigger an automatic retry.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            EngineError::Safety(_) | EngineError::Limit(_) | EngineError::Config(_)
        )
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
