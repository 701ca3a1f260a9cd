//! Greenwave Core - V2X Relay and Signal Coordination Protocol
//!
//! This library covers the two parts of intersection coordination with real
//! protocol and state-machine complexity:
//! 1. **Multi-hop relay**: TTL-bounded, best-effort forwarding of detection
//!    reports to the infrastructure and directives back to vehicles, with
//!    local retry while connectivity is intermittent
//! 2. **Signal control**: per-lane occupancy tracking, phase transitions
//!    under a timer or occupancy-threshold policy, and per-vehicle
//!    directives with an anti-oscillation latch on the vehicle side
//!
//! All I/O goes through `greenwave_env`, so the same agents run under the
//! deterministic simulator and a real radio stack.

pub mod agent_runtime;
pub mod config;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod messages;
pub mod metrics;
pub mod neighbors;
pub mod occupancy;
pub mod relay;
pub mod retry_queue;
pub mod routing;
pub mod signal;

// Re-export key types for convenience
pub use agent_runtime::{InfrastructureAgent, NodeAgent, VehicleAgent};
pub use config::{Approach, ConflictTable, ControllerConfig, GreenwaveConfig, PhasePolicy, RelayConfig, VehicleConfig};
pub use error::{ConfigError, ProtocolError};
pub use executor::{DirectiveExecutor, MotionIntent, NoOpReason, SignalInput, VehicleState};
pub use geometry::{BrakingArea, IntersectionGeometry, StopPointTable};
pub use messages::{
    Beacon, DetectionReport, Directive, Payload, PayloadType, PhaseSnapshot, RoutedMessage, Rule, SignalStatus,
    DEFAULT_TTL,
};
pub use metrics::{ControllerStats, RelayStats};
pub use neighbors::NeighborTable;
pub use occupancy::{DetectionOutcome, LaneOccupancyTracker};
pub use relay::{RelayService, SendOutcome};
pub use retry_queue::{DrainReport, QueuedMessage, RetryAttempt, RetryQueue};
pub use routing::{RelayRouter, RouteDecision, RouteHints};
pub use signal::{Evaluation, SignalController};
