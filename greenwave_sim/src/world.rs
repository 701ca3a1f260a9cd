//! SimWorld - The simulation harness container.
//!
//! One infrastructure node at the intersection center plus any number of
//! vehicles, all driven by a single event queue:
//!
//! ```text
//! pop wake-up ─► step bodies to its time ─► on_tick()
//!                                             │
//!        ┌────────────────────────────────────┘
//!        ▼
//! medium.deliver() ─► on_message_received() ─► (new frames) ─► repeat
//! ```
//!
//! Frames sent while handling a delivery go out in the next round of the
//! same instant, so a relay chain settles before the clock moves on.

use crate::body::{ApproachPath, MotionLog, VehicleBody};
use crate::context::{SimClock, SimNodeContext};
use crate::error::SimError;
use crate::network::{MediumStats, RadioMedium, SimNetworkController, SimRadio};
use crate::scheduler::EventQueue;
use greenwave_core::{GreenwaveConfig, InfrastructureAgent, NodeAgent, PhaseSnapshot, RelayStats, SignalStatus, VehicleAgent};
use greenwave_env::{LaneKey, NodeId, Position};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub type SimVehicle = VehicleAgent<SimNodeContext, SimRadio>;
pub type SimInfrastructure = InfrastructureAgent<SimNodeContext, SimRadio>;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Radio range of the medium in meters
    pub radio_range_m: f64,

    /// Distance vehicles spawn before their stop point
    pub approach_length_m: f64,

    /// Distance vehicles drive past the center before leaving
    pub exit_length_m: f64,

    pub cruise_speed_mps: f64,

    /// Delivery rounds per instant before frames are left for later
    pub max_delivery_rounds: usize,

    /// Protocol configuration shared by every node
    pub greenwave: GreenwaveConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            radio_range_m: 35.0,
            approach_length_m: 60.0,
            exit_length_m: 30.0,
            cruise_speed_mps: 10.0,
            max_delivery_rounds: 16,
            greenwave: GreenwaveConfig::default(),
        }
    }
}

/// Counters kept by the world itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WorldStats {
    pub events_dispatched: u64,
    pub frames_delivered: u64,
    pub vehicles_spawned: u64,
    pub vehicles_exited: u64,
    /// Instants at which two conflicting routes were both GREEN
    pub conflicting_greens: u64,
}

struct VehicleHandle {
    agent: SimVehicle,
    body: Arc<Mutex<VehicleBody>>,
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    config: SimConfig,
    clock: SimClock,
    events: Arc<Mutex<EventQueue>>,
    medium: RadioMedium,
    network_controller: SimNetworkController,
    infrastructure: SimInfrastructure,
    vehicles: BTreeMap<NodeId, VehicleHandle>,
    rng: ChaCha8Rng,
    next_seed: u64,
    last_physics: Duration,
    stats: WorldStats,

    /// Counters of vehicles that already left
    retired_relay: RelayStats,
    retired_motion: MotionLog,
}

impl SimWorld {
    /// Creates a world with only the infrastructure node, due to tick at 0.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.greenwave.validate()?;

        // Derive separate seeds for different subsystems
        let medium_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let spawn_seed = config.seed.wrapping_mul(0x517cc1b727220a95);

        let clock = SimClock::new();
        let events = Arc::new(Mutex::new(EventQueue::new()));
        let network_controller = SimNetworkController::new();
        let medium = RadioMedium::new(config.radio_range_m, network_controller.clone(), medium_seed);

        let infrastructure_id = config.greenwave.relay.infrastructure_id;
        let body = VehicleBody::parked(config.greenwave.geometry.infrastructure_position, None, false);
        let context = SimNodeContext::new(
            infrastructure_id,
            clock.clone(),
            events.clone(),
            Arc::new(Mutex::new(body)),
        );
        let infrastructure = InfrastructureAgent::new(
            Arc::new(context),
            Arc::new(medium.radio(infrastructure_id)),
            &config.greenwave,
        );
        events.lock().unwrap().push(Duration::ZERO, infrastructure_id);

        Ok(Self {
            config,
            clock,
            events,
            medium,
            network_controller,
            infrastructure,
            vehicles: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(spawn_seed),
            next_seed: 1,
            last_physics: Duration::ZERO,
            stats: WorldStats::default(),
            retired_relay: RelayStats::default(),
            retired_motion: MotionLog::default(),
        })
    }

    /// Spawns a vehicle at the start of `lane`'s approach path.
    pub fn spawn_vehicle(&mut self, lane: LaneKey) -> Result<NodeId, SimError> {
        let geometry = &self.config.greenwave.geometry;
        let stop_point = geometry
            .stop_points
            .get(&lane.route, lane.lane)
            .ok_or_else(|| SimError::UnknownLane(lane.clone()))?;
        let path = ApproachPath::through(
            stop_point,
            geometry.infrastructure_position,
            self.config.approach_length_m,
            self.config.exit_length_m,
        )
        .ok_or_else(|| SimError::DegeneratePath(lane.clone()))?;

        debug!("Spawning vehicle in lane {} at {}", lane, path.start);
        let body = VehicleBody::driving(path, lane, self.config.cruise_speed_mps);
        Ok(self.insert_vehicle(body))
    }

    /// Spawns a vehicle that never moves, e.g. a relay parked by the road.
    pub fn spawn_parked(&mut self, position: Position, lane: Option<LaneKey>, moving_towards: bool) -> NodeId {
        self.insert_vehicle(VehicleBody::parked(position, lane, moving_towards))
    }

    fn insert_vehicle(&mut self, body: VehicleBody) -> NodeId {
        let mut id = NodeId::from_seed(self.next_seed);
        self.next_seed += 1;
        if id == self.infrastructure.node_id {
            id = NodeId::from_seed(self.next_seed);
            self.next_seed += 1;
        }

        let body = Arc::new(Mutex::new(body));
        let context = SimNodeContext::new(id, self.clock.clone(), self.events.clone(), body.clone());
        let agent = VehicleAgent::new(Arc::new(context), Arc::new(self.medium.radio(id)), &self.config.greenwave);

        // Spread first ticks over one interval so vehicles don't beacon in lockstep
        let interval_ms = self.config.greenwave.vehicle.tick_interval_ms.max(1);
        let first_tick = self.clock.now() + Duration::from_millis(self.rng.gen_range(0..interval_ms));
        self.events.lock().unwrap().push(first_tick, id);

        self.vehicles.insert(id, VehicleHandle { agent, body });
        self.stats.vehicles_spawned += 1;
        id
    }

    /// Processes every event up to and including `end`, then moves the
    /// clock to `end`.
    pub fn run_until(&mut self, end: Duration) {
        loop {
            let next = self.events.lock().unwrap().peek_time();
            if !matches!(next, Some(at) if at <= end) {
                break;
            }
            let Some(wakeup) = self.events.lock().unwrap().pop() else {
                break;
            };

            self.advance_physics(wakeup.at);
            self.dispatch_tick(wakeup.node);
            self.pump_radio();
            self.retire_exited();
        }
        self.advance_physics(end);
    }

    /// Runs for `duration` past the current time.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.clock.now() + duration;
        self.run_until(end);
    }

    fn advance_physics(&mut self, to: Duration) {
        if to > self.last_physics {
            let dt = (to - self.last_physics).as_secs_f64();
            for handle in self.vehicles.values() {
                handle.body.lock().unwrap().step(dt);
            }
            self.last_physics = to;
        }
        self.clock.advance_to(to);
    }

    fn dispatch_tick(&mut self, node: NodeId) {
        if node == self.infrastructure.node_id {
            self.stats.events_dispatched += 1;
            self.infrastructure.on_tick();
            self.check_conflicting_greens();
        } else if let Some(handle) = self.vehicles.get_mut(&node) {
            self.stats.events_dispatched += 1;
            handle.agent.on_tick();
        }
    }

    /// Delivers frames until the medium is quiet or the round cap is hit.
    fn pump_radio(&mut self) {
        let infrastructure_id = self.infrastructure.node_id;
        for _ in 0..self.config.max_delivery_rounds {
            let positions = self.positions();
            let deliveries = self.medium.deliver(&positions);
            if deliveries.is_empty() {
                return;
            }

            self.stats.frames_delivered += deliveries.len() as u64;
            for (to, envelope) in deliveries {
                if to == infrastructure_id {
                    self.infrastructure.on_message_received(envelope);
                } else if let Some(handle) = self.vehicles.get_mut(&to) {
                    handle.agent.on_message_received(envelope);
                }
            }
        }
        debug!("Delivery round cap reached at {:?}", self.clock.now());
    }

    fn retire_exited(&mut self) {
        let exited: Vec<NodeId> = self
            .vehicles
            .iter()
            .filter(|(_, handle)| handle.body.lock().unwrap().has_exited())
            .map(|(id, _)| *id)
            .collect();

        for id in exited {
            if let Some(handle) = self.vehicles.remove(&id) {
                debug!("Vehicle {} left the scenario", id);
                self.retired_relay += *handle.agent.relay().stats();
                self.retired_motion += handle.body.lock().unwrap().log;
                self.stats.vehicles_exited += 1;
            }
        }
    }

    fn check_conflicting_greens(&mut self) {
        let snapshot = self.infrastructure.controller().snapshot();
        if let Some((a, b)) = conflicting_greens(&snapshot, &self.config.greenwave) {
            warn!("Routes {} and {} are both GREEN at {:?}", a, b, self.clock.now());
            self.stats.conflicting_greens += 1;
        }
    }

    /// Positions of every node currently in the world.
    pub fn positions(&self) -> BTreeMap<NodeId, Position> {
        let mut positions: BTreeMap<NodeId, Position> = self
            .vehicles
            .iter()
            .map(|(id, handle)| (*id, handle.body.lock().unwrap().position()))
            .collect();
        positions.insert(
            self.infrastructure.node_id,
            self.config.greenwave.geometry.infrastructure_position,
        );
        positions
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn infrastructure(&self) -> &SimInfrastructure {
        &self.infrastructure
    }

    pub fn infrastructure_mut(&mut self) -> &mut SimInfrastructure {
        &mut self.infrastructure
    }

    pub fn vehicle(&self, id: &NodeId) -> Option<&SimVehicle> {
        self.vehicles.get(id).map(|handle| &handle.agent)
    }

    /// A copy of a vehicle's current body.
    pub fn vehicle_body(&self, id: &NodeId) -> Option<VehicleBody> {
        self.vehicles.get(id).map(|handle| handle.body.lock().unwrap().clone())
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn network_controller(&self) -> &SimNetworkController {
        &self.network_controller
    }

    pub fn medium_stats(&self) -> MediumStats {
        self.medium.stats()
    }

    pub fn stats(&self) -> WorldStats {
        self.stats
    }

    /// Relay counters summed over every node, including departed vehicles.
    pub fn relay_totals(&self) -> RelayStats {
        let mut totals = self.retired_relay;
        totals += *self.infrastructure.relay().stats();
        for handle in self.vehicles.values() {
            totals += *handle.agent.relay().stats();
        }
        totals
    }

    /// Motion commands applied by every vehicle, including departed ones.
    pub fn motion_totals(&self) -> MotionLog {
        let mut totals = self.retired_motion;
        for handle in self.vehicles.values() {
            totals += handle.body.lock().unwrap().log;
        }
        totals
    }

    pub fn log_summary(&self) {
        let relay = self.relay_totals();
        info!(
            "t={:.1}s vehicles={} spawned={} exited={} forwarded={} dropped={}",
            self.now().as_secs_f64(),
            self.vehicle_count(),
            self.stats.vehicles_spawned,
            self.stats.vehicles_exited,
            relay.forwarded,
            relay.dropped()
        );
    }
}

/// First pair of conflicting routes that both have a GREEN lane.
pub fn conflicting_greens(snapshot: &PhaseSnapshot, config: &GreenwaveConfig) -> Option<(String, String)> {
    let green: Vec<&String> = snapshot
        .phase_state
        .iter()
        .filter(|(_, lanes)| lanes.values().any(|status| *status == SignalStatus::Green))
        .map(|(route, _)| route)
        .collect();

    green.iter().enumerate().find_map(|(i, a)| {
        green[i + 1..]
            .iter()
            .find(|b| config.controller.conflicts.conflicts(a, b))
            .map(|b| ((*a).clone(), (*b).clone()))
    })
}
