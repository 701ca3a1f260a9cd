//! Error types for the simulation harness.

use greenwave_core::ConfigError;
use greenwave_env::LaneKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// No stop point is configured for the lane
    #[error("Unknown lane: {0}")]
    UnknownLane(LaneKey),

    /// The lane's stop point coincides with the intersection center
    #[error("Lane {0} has no approach direction")]
    DegeneratePath(LaneKey),

    /// Invalid parameters for a sampling distribution
    #[error("Invalid distribution: {0}")]
    Distribution(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
