//! Environment context traits for Greenwave nodes.

use crate::types::{LaneKey, NodeId, Position};
use std::time::Duration;

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "outside world" of a single node so that the
/// protocol core runs unchanged under the simulator and under a real
/// radio stack.
///
/// # Implementations
///
/// - **Simulation**: `SimNodeContext` - virtual clock + discrete-event queue
///
/// # Scheduling
///
/// The scheduler guarantees that a node asking to be woken at `at` is
/// invoked at or after `at`, in non-decreasing time order across the whole
/// system. Nodes scheduled for the same instant run in no particular order.
pub trait NodeContext {
    /// Returns this node's identifier.
    fn node_id(&self) -> NodeId;

    /// Returns the current time since the start of the run.
    fn now(&self) -> Duration;

    /// Returns the node's current position.
    fn position(&self) -> Position;

    /// Asks the scheduler to invoke `on_tick()` again at `at`.
    fn schedule_wakeup(&self, at: Duration);
}

/// Motion state a vehicle reports in its beacons.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Kinematics {
    /// Speed in m/s
    pub speed: f64,

    /// Heading in radians, counter-clockwise from +x
    pub heading: f64,

    /// Longitudinal acceleration in m/s^2
    pub acceleration: f64,
}

/// A motion command handed to the vehicle's navigation collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Come to a halt at the given point
    StopAt(Position),

    /// Reduce speed and proceed with caution
    ReduceSpeed,

    /// Resume normal driving after a stop
    Resume,
}

/// Context for vehicle nodes: adds navigation queries and motion control.
pub trait VehicleContext: NodeContext {
    /// Current speed, heading and acceleration.
    fn kinematics(&self) -> Kinematics;

    /// Current route and lane, if the vehicle is on a known road.
    fn lane(&self) -> Option<LaneKey>;

    /// Whether the vehicle is still approaching the intersection.
    fn moving_towards_intersection(&self) -> bool;

    /// Applies a motion command.
    fn apply_motion(&self, command: MotionCommand);
}
