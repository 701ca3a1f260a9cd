//! Error types for the Greenwave protocol core.
//!
//! None of these are fatal: the agents turn every per-message error into a
//! logged, counted drop.

use greenwave_env::EnvError;
use thiserror::Error;

/// Errors raised while encoding, decoding or transmitting a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown payload tag: {0}")]
    UnknownPayloadTag(u8),

    #[error("Failed to decode {kind} payload: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] EnvError),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
