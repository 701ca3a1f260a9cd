//! Simulation context implementing NodeContext/VehicleContext.

use crate::body::VehicleBody;
use crate::scheduler::EventQueue;
use greenwave_env::{Kinematics, LaneKey, MotionCommand, NodeContext, NodeId, Position, VehicleContext};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared virtual clock.
///
/// Cloning shares the underlying time; only the world advances it.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Arc<Mutex<Duration>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    /// Moves the clock forward to `at`. Never moves it backwards.
    pub fn advance_to(&self, at: Duration) {
        let mut now = self.now.lock().unwrap();
        if at > *now {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

/// Per-node view of the simulated world.
///
/// Backed by:
/// - the shared virtual clock
/// - the shared event queue, for wake-ups
/// - this node's body, for position, lane and motion
pub struct SimNodeContext {
    id: NodeId,
    clock: SimClock,
    events: Arc<Mutex<EventQueue>>,
    body: Arc<Mutex<VehicleBody>>,
}

impl SimNodeContext {
    pub fn new(id: NodeId, clock: SimClock, events: Arc<Mutex<EventQueue>>, body: Arc<Mutex<VehicleBody>>) -> Self {
        Self {
            id,
            clock,
            events,
            body,
        }
    }

    pub fn body(&self) -> &Arc<Mutex<VehicleBody>> {
        &self.body
    }
}

impl NodeContext for SimNodeContext {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn position(&self) -> Position {
        self.body.lock().unwrap().position()
    }

    fn schedule_wakeup(&self, at: Duration) {
        self.events.lock().unwrap().push(at, self.id);
    }
}

impl VehicleContext for SimNodeContext {
    fn kinematics(&self) -> Kinematics {
        self.body.lock().unwrap().kinematics()
    }

    fn lane(&self) -> Option<LaneKey> {
        self.body.lock().unwrap().lane.clone()
    }

    fn moving_towards_intersection(&self) -> bool {
        self.body.lock().unwrap().moving_towards_intersection()
    }

    fn apply_motion(&self, command: MotionCommand) {
        self.body.lock().unwrap().apply(command);
    }
}
