//! Agent Runtime - wires the protocol components to the environment.
//!
//! This module is the integration layer between the node-local components
//! (relay, occupancy, signal control, executor) and the environment
//! abstraction (NodeContext / RadioTransport).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       VehicleAgent                          │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │              Context: VehicleContext                  │   │
//! │  │  • now() / position() / lane()                       │   │
//! │  │  • schedule_wakeup() → tick cadence                  │   │
//! │  │  • apply_motion() → executor output                  │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │  ┌─────────────────────────┐ ┌──────────────────────────┐   │
//! │  │  RelayService           │ │  DirectiveExecutor       │   │
//! │  │  neighbors/router/retry │ │  already_stopped latch   │   │
//! │  └─────────────────────────┘ └──────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   InfrastructureAgent                       │
//! │  ┌──────────────┐ ┌─────────────────────┐ ┌─────────────┐   │
//! │  │ RelayService │ │ LaneOccupancyTracker│ │ Signal      │   │
//! │  │              │ │                     │ │ Controller  │   │
//! │  └──────────────┘ └─────────────────────┘ └─────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Neither agent ever returns an error to its caller: a frame that cannot
//! be decoded, routed or sent is logged and counted, then forgotten.

use crate::config::{ControllerConfig, GreenwaveConfig, RelayConfig, VehicleConfig};
use crate::executor::{DirectiveExecutor, MotionIntent, SignalInput, VehicleState};
use crate::geometry::IntersectionGeometry;
use crate::messages::{Beacon, DetectionReport, Directive, Payload, PhaseSnapshot, RoutedMessage};
use crate::occupancy::LaneOccupancyTracker;
use crate::relay::RelayService;
use crate::signal::SignalController;
use greenwave_env::{distance, Envelope, NodeContext, NodeId, Position, RadioTransport, VehicleContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The two entry points the scheduler and the radio call into.
pub trait NodeAgent {
    fn node_id(&self) -> NodeId;

    /// Invoked by the scheduler at (or after) the requested wake-up time.
    fn on_tick(&mut self);

    /// Invoked by the radio for every frame that reaches this node.
    fn on_message_received(&mut self, envelope: Envelope);
}

// =============================================================================
// VEHICLE
// =============================================================================

/// A vehicle node: beacons, detection reports, relaying and obeying.
pub struct VehicleAgent<Ctx, Net>
where
    Ctx: VehicleContext,
    Net: RadioTransport,
{
    /// Node identifier
    pub node_id: NodeId,

    /// Environment context
    pub context: Arc<Ctx>,

    /// Radio interface
    pub network: Arc<Net>,

    relay: RelayService,
    executor: DirectiveExecutor,
    vehicle: VehicleConfig,
    relay_config: RelayConfig,
    geometry: IntersectionGeometry,
    last_intent: Option<MotionIntent>,
    detections_sent: u64,
    tick_count: u64,
}

impl<Ctx, Net> VehicleAgent<Ctx, Net>
where
    Ctx: VehicleContext,
    Net: RadioTransport,
{
    pub fn new(context: Arc<Ctx>, network: Arc<Net>, config: &GreenwaveConfig) -> Self {
        let node_id = context.node_id();
        Self {
            node_id,
            relay: RelayService::new(node_id, &config.relay, config.geometry.infrastructure_position),
            executor: DirectiveExecutor::new(
                config.geometry.stop_points.clone(),
                config.vehicle.stop_trigger_distance_m,
            ),
            vehicle: config.vehicle.clone(),
            relay_config: config.relay.clone(),
            geometry: config.geometry.clone(),
            context,
            network,
            last_intent: None,
            detections_sent: 0,
            tick_count: 0,
        }
    }

    pub fn relay(&self) -> &RelayService {
        &self.relay
    }

    pub fn executor(&self) -> &DirectiveExecutor {
        &self.executor
    }

    /// Outcome of the most recent snapshot or directive.
    pub fn last_intent(&self) -> Option<MotionIntent> {
        self.last_intent
    }

    pub fn detections_sent(&self) -> u64 {
        self.detections_sent
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    fn beacon(&self, position: Position) -> Beacon {
        let kinematics = self.context.kinematics();
        Beacon {
            vehicle_id: self.node_id,
            position,
            speed: kinematics.speed,
            heading: kinematics.heading,
            acceleration: kinematics.acceleration,
            lane: self.context.lane(),
            moving_towards_intersection: self.context.moving_towards_intersection(),
        }
    }

    /// A detection report, if the vehicle is approaching inside a braking area.
    fn detection(&self, position: Position) -> Option<DetectionReport> {
        if !self.context.moving_towards_intersection() || !self.geometry.in_braking_area(&position) {
            return None;
        }
        let lane = self.context.lane()?;
        let mut report = DetectionReport::new(self.node_id, lane, position);
        report.ttl = self.relay_config.initial_ttl;
        Some(report)
    }

    fn execute(&mut self, input: SignalInput<'_>, position: Position) {
        let state = VehicleState {
            lane: self.context.lane(),
            position,
            moving_towards_intersection: self.context.moving_towards_intersection(),
        };
        let intent = self.executor.on_phase_or_directive(input, &state);
        match intent {
            MotionIntent::Command(command) => {
                debug!("Vehicle {} applying {:?}", self.node_id, command);
                self.context.apply_motion(command);
            }
            MotionIntent::NoOp(reason) => debug!("Vehicle {} ignoring signal: {:?}", self.node_id, reason),
        }
        self.last_intent = Some(intent);
    }

    fn on_directive(&mut self, directive: Directive, envelope: &Envelope, position: Position) {
        if directive.target != self.node_id {
            let previous = Some(envelope.sender);
            let now = self.context.now();
            if let Err(e) = self.relay.send_routed(
                RoutedMessage::Directive(directive),
                previous,
                now,
                &position,
                self.network.as_ref(),
            ) {
                warn!("Vehicle {} failed to relay directive: {}", self.node_id, e);
            }
            return;
        }

        if distance(&envelope.sender_position, &position) > self.relay_config.phase_accept_distance_m {
            debug!("Vehicle {} ignoring directive from distant {}", self.node_id, envelope.sender);
            return;
        }
        self.execute(SignalInput::Directive(&directive), position);
    }

    fn on_snapshot(&mut self, snapshot: PhaseSnapshot, envelope: &Envelope, position: Position) {
        if distance(&envelope.sender_position, &position) > self.relay_config.phase_accept_distance_m {
            debug!("Vehicle {} ignoring snapshot from distant {}", self.node_id, envelope.sender);
            return;
        }
        self.execute(SignalInput::Phase(&snapshot), position);
    }
}

impl<Ctx, Net> NodeAgent for VehicleAgent<Ctx, Net>
where
    Ctx: VehicleContext,
    Net: RadioTransport,
{
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn on_tick(&mut self) {
        let now = self.context.now();
        let position = self.context.position();
        self.context.schedule_wakeup(now + self.vehicle.tick_interval());
        self.tick_count += 1;

        let net = self.network.as_ref();
        self.relay.drain(now, &position, net);

        if self.tick_count % u64::from(self.vehicle.detection_every_ticks) == 0 {
            if let Some(report) = self.detection(position) {
                self.detections_sent += 1;
                if let Err(e) = self.relay.originate(RoutedMessage::Detection(report), now, &position, net) {
                    warn!("Vehicle {} failed to send detection: {}", self.node_id, e);
                }
            }
        }

        let beacon = Payload::Beacon(self.beacon(position));
        if let Err(e) = self.relay.broadcast(&beacon, &position, net) {
            warn!("Vehicle {} failed to broadcast beacon: {}", self.node_id, e);
        }
    }

    fn on_message_received(&mut self, envelope: Envelope) {
        if envelope.sender == self.node_id {
            return;
        }
        let payload = match Payload::from_envelope(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Vehicle {} dropping frame from {}: {}", self.node_id, envelope.sender, e);
                self.relay.record_malformed();
                return;
            }
        };

        let position = self.context.position();
        match payload {
            Payload::Beacon(beacon) => {
                self.relay.on_beacon(&beacon, &position);
            }
            Payload::DetectionReport(report) => {
                let now = self.context.now();
                if let Err(e) = self.relay.send_routed(
                    RoutedMessage::Detection(report),
                    Some(envelope.sender),
                    now,
                    &position,
                    self.network.as_ref(),
                ) {
                    warn!("Vehicle {} failed to relay detection: {}", self.node_id, e);
                }
            }
            Payload::Directive(directive) => self.on_directive(directive, &envelope, position),
            Payload::PhaseSnapshot(snapshot) => self.on_snapshot(snapshot, &envelope, position),
        }
    }
}

// =============================================================================
// INFRASTRUCTURE
// =============================================================================

/// The intersection's road-side unit: occupancy, phases and directives.
pub struct InfrastructureAgent<Ctx, Net>
where
    Ctx: NodeContext,
    Net: RadioTransport,
{
    /// Node identifier
    pub node_id: NodeId,

    /// Environment context
    pub context: Arc<Ctx>,

    /// Radio interface
    pub network: Arc<Net>,

    relay: RelayService,
    occupancy: LaneOccupancyTracker,
    controller: SignalController,
    controller_config: ControllerConfig,
    direct_range: f64,
    last_snapshot: Option<Duration>,
    tick_count: u64,
}

impl<Ctx, Net> InfrastructureAgent<Ctx, Net>
where
    Ctx: NodeContext,
    Net: RadioTransport,
{
    pub fn new(context: Arc<Ctx>, network: Arc<Net>, config: &GreenwaveConfig) -> Self {
        let node_id = context.node_id();
        if node_id != config.relay.infrastructure_id {
            warn!(
                "Infrastructure node {} does not match configured id {}",
                node_id, config.relay.infrastructure_id
            );
        }
        let controller = SignalController::new(
            node_id,
            config.controller.clone(),
            config.relay.initial_ttl,
            context.now(),
        );

        Self {
            node_id,
            relay: RelayService::new(node_id, &config.relay, config.geometry.infrastructure_position),
            occupancy: LaneOccupancyTracker::new(),
            controller,
            controller_config: config.controller.clone(),
            direct_range: config.relay.direct_range_m,
            context,
            network,
            last_snapshot: None,
            tick_count: 0,
        }
    }

    pub fn relay(&self) -> &RelayService {
        &self.relay
    }

    pub fn occupancy(&self) -> &LaneOccupancyTracker {
        &self.occupancy
    }

    pub fn controller(&self) -> &SignalController {
        &self.controller
    }

    /// Mutable access for manual overrides and switching the signals off.
    pub fn controller_mut(&mut self) -> &mut SignalController {
        &mut self.controller
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    fn broadcast_snapshot(&mut self, now: Duration, position: &Position) {
        let payload = Payload::PhaseSnapshot(self.controller.snapshot());
        match self.relay.broadcast(&payload, position, self.network.as_ref()) {
            Ok(()) => self.last_snapshot = Some(now),
            Err(e) => warn!("Infrastructure failed to broadcast snapshot: {}", e),
        }
    }

    fn snapshot_due(&self, now: Duration) -> bool {
        self.last_snapshot
            .map_or(true, |at| now.saturating_sub(at) >= self.controller_config.snapshot_interval())
    }

    fn on_detection(&mut self, report: DetectionReport, envelope: &Envelope, position: &Position) {
        if !envelope.destination.is_node(self.node_id) {
            return;
        }
        // The last hop is out of range, so it is no longer a neighbor either
        if distance(&envelope.sender_position, position) > self.direct_range {
            debug!("Ignoring detection relayed from out-of-range {}", envelope.sender);
            self.relay.forget(&envelope.sender);
            return;
        }
        let lane = report.lane_key();
        if !self.controller_config.knows_lane(&lane) {
            debug!("Ignoring detection for unconfigured lane {}", lane);
            return;
        }
        let outcome = self.occupancy.on_detection(&report);
        debug!(
            "Vehicle {} detected in lane {} ({:?}, depth {})",
            report.vehicle_id,
            lane,
            outcome,
            self.occupancy.queue_depth(&lane)
        );
    }
}

impl<Ctx, Net> NodeAgent for InfrastructureAgent<Ctx, Net>
where
    Ctx: NodeContext,
    Net: RadioTransport,
{
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn on_tick(&mut self) {
        let now = self.context.now();
        let position = self.context.position();
        self.context
            .schedule_wakeup(now + self.controller_config.tick_interval());
        self.tick_count += 1;

        let net = self.network.as_ref();
        self.relay.drain(now, &position, net);

        let mut phases_changed = false;
        if let Some(evaluation) = self.controller.on_tick(now, &self.occupancy) {
            info!(
                "Evaluation at {:?}: {} lane(s) changed, {} directive(s)",
                now,
                evaluation.changed.len(),
                evaluation.directives.len()
            );
            phases_changed = !evaluation.changed.is_empty();
            for directive in evaluation.directives {
                let target = directive.target;
                if let Err(e) = self
                    .relay
                    .originate(RoutedMessage::Directive(directive), now, &position, net)
                {
                    warn!("Failed to send directive to {}: {}", target, e);
                }
            }
        }

        if phases_changed || self.snapshot_due(now) {
            self.broadcast_snapshot(now, &position);
        }
    }

    fn on_message_received(&mut self, envelope: Envelope) {
        if envelope.sender == self.node_id {
            return;
        }
        let payload = match Payload::from_envelope(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Infrastructure dropping frame from {}: {}", envelope.sender, e);
                self.relay.record_malformed();
                return;
            }
        };

        let position = self.context.position();
        match payload {
            Payload::Beacon(beacon) => {
                self.relay.on_beacon(&beacon, &position);
                if let Some(lane) = self.occupancy.on_departure_beacon(&beacon) {
                    debug!("Vehicle {} departed lane {}", beacon.vehicle_id, lane);
                }
            }
            Payload::DetectionReport(report) => self.on_detection(report, &envelope, &position),
            Payload::Directive(_) | Payload::PhaseSnapshot(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{PayloadType, Rule, SignalStatus};
    use crate::neighbors::tests::beacon_at;
    use crate::relay::tests::RecordingRadio;
    use greenwave_env::{Destination, Kinematics, LaneKey, MotionCommand, RouteSelector};
    use std::cell::{Cell, RefCell};

    struct MockContext {
        id: NodeId,
        now: Cell<Duration>,
        position: Cell<Position>,
        lane: RefCell<Option<LaneKey>>,
        moving_towards: Cell<bool>,
        wakeups: RefCell<Vec<Duration>>,
        commands: RefCell<Vec<MotionCommand>>,
    }

    impl MockContext {
        fn new(id: NodeId, x: f64, y: f64) -> Arc<Self> {
            Arc::new(Self {
                id,
                now: Cell::new(Duration::ZERO),
                position: Cell::new(Position::new(x, y)),
                lane: RefCell::new(Some(LaneKey::new("1", 0))),
                moving_towards: Cell::new(true),
                wakeups: RefCell::new(Vec::new()),
                commands: RefCell::new(Vec::new()),
            })
        }
    }

    impl NodeContext for MockContext {
        fn node_id(&self) -> NodeId {
            self.id
        }

        fn now(&self) -> Duration {
            self.now.get()
        }

        fn position(&self) -> Position {
            self.position.get()
        }

        fn schedule_wakeup(&self, at: Duration) {
            self.wakeups.borrow_mut().push(at);
        }
    }

    impl VehicleContext for MockContext {
        fn kinematics(&self) -> Kinematics {
            Kinematics {
                speed: 8.0,
                ..Kinematics::default()
            }
        }

        fn lane(&self) -> Option<LaneKey> {
            self.lane.borrow().clone()
        }

        fn moving_towards_intersection(&self) -> bool {
            self.moving_towards.get()
        }

        fn apply_motion(&self, command: MotionCommand) {
            self.commands.borrow_mut().push(command);
        }
    }

    fn infra_id() -> NodeId {
        RelayConfig::default().infrastructure_id
    }

    fn vehicle(seed: u64, x: f64, y: f64) -> (VehicleAgent<MockContext, RecordingRadio>, Arc<MockContext>, Arc<RecordingRadio>) {
        let id = NodeId::from_seed(seed);
        let ctx = MockContext::new(id, x, y);
        let radio = Arc::new(RecordingRadio::new(id));
        let agent = VehicleAgent::new(ctx.clone(), radio.clone(), &GreenwaveConfig::default());
        (agent, ctx, radio)
    }

    fn infrastructure() -> (
        InfrastructureAgent<MockContext, RecordingRadio>,
        Arc<MockContext>,
        Arc<RecordingRadio>,
    ) {
        let ctx = MockContext::new(infra_id(), 0.0, 0.0);
        let radio = Arc::new(RecordingRadio::new(infra_id()));
        let agent = InfrastructureAgent::new(ctx.clone(), radio.clone(), &GreenwaveConfig::default());
        (agent, ctx, radio)
    }

    fn frame(sender: NodeId, at: Position, destination: Destination, payload: Payload) -> Envelope {
        Envelope::new(
            sender,
            at,
            destination,
            payload.payload_type() as u8,
            payload.encode().unwrap(),
        )
    }

    fn count_type(sent: &[(Envelope, RouteSelector)], kind: PayloadType) -> usize {
        sent.iter().filter(|(e, _)| e.payload_type == kind as u8).count()
    }

    #[test]
    fn test_vehicle_tick_beacons_and_reschedules() {
        let (mut agent, ctx, radio) = vehicle(1, -60.0, 5.0);
        agent.on_tick();

        assert_eq!(*ctx.wakeups.borrow(), vec![Duration::from_millis(100)]);
        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, RouteSelector::Broadcast);
        match Payload::from_envelope(&sent[0].0).unwrap() {
            Payload::Beacon(beacon) => {
                assert_eq!(beacon.vehicle_id, NodeId::from_seed(1));
                assert_eq!(beacon.lane, Some(LaneKey::new("1", 0)));
                assert_eq!(beacon.speed, 8.0);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_vehicle_reports_every_second_tick_in_braking_area() {
        let (mut agent, _ctx, radio) = vehicle(1, -15.0, 8.0);

        agent.on_tick();
        assert_eq!(count_type(&radio.take(), PayloadType::DetectionReport), 0);

        agent.on_tick();
        let sent = radio.take();
        assert_eq!(count_type(&sent, PayloadType::DetectionReport), 1);
        assert!(sent.iter().any(|(_, s)| *s == RouteSelector::Direct(infra_id())));
        assert_eq!(agent.detections_sent(), 1);
    }

    #[test]
    fn test_vehicle_outside_braking_area_never_reports() {
        let (mut agent, _ctx, radio) = vehicle(1, -60.0, 5.0);
        for _ in 0..4 {
            agent.on_tick();
        }
        assert_eq!(count_type(&radio.take(), PayloadType::DetectionReport), 0);
    }

    #[test]
    fn test_vehicle_obeys_own_directive() {
        let (mut agent, ctx, _radio) = vehicle(1, -15.0, 6.0);
        let directive = Payload::Directive(Directive::new(NodeId::from_seed(1), Rule::Stop, None));

        agent.on_message_received(frame(
            NodeId::from_seed(2),
            Position::new(-5.0, 5.0),
            Destination::Node(NodeId::from_seed(1)),
            directive,
        ));

        let commands = ctx.commands.borrow();
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], MotionCommand::StopAt(_)));
        assert!(agent.executor().already_stopped());
    }

    #[test]
    fn test_vehicle_relays_foreign_directive() {
        let (mut agent, ctx, radio) = vehicle(1, -20.0, 0.0);
        let target = NodeId::from_seed(9);
        let directive = Directive::new(target, Rule::Go, Some(Position::new(-40.0, 0.0)));

        agent.on_message_received(frame(
            infra_id(),
            Position::origin(),
            Destination::Node(target),
            Payload::Directive(directive),
        ));

        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, RouteSelector::Direct(target));
        assert!(ctx.commands.borrow().is_empty());
    }

    #[test]
    fn test_vehicle_ignores_distant_snapshot() {
        let (mut agent, ctx, _radio) = vehicle(1, -15.0, 6.0);
        let lanes = vec![(LaneKey::new("1", 0), SignalStatus::Blinking)];
        let snapshot = PhaseSnapshot::from_lanes(infra_id(), lanes.iter().map(|(k, s)| (k, s)), true);

        agent.on_message_received(frame(
            infra_id(),
            Position::new(100.0, 0.0),
            Destination::Broadcast,
            Payload::PhaseSnapshot(snapshot.clone()),
        ));
        assert!(ctx.commands.borrow().is_empty());

        agent.on_message_received(frame(
            infra_id(),
            Position::origin(),
            Destination::Broadcast,
            Payload::PhaseSnapshot(snapshot),
        ));
        assert_eq!(*ctx.commands.borrow(), vec![MotionCommand::ReduceSpeed]);
    }

    #[test]
    fn test_malformed_frame_is_counted() {
        let (mut agent, _ctx, _radio) = vehicle(1, 0.0, 0.0);
        agent.on_message_received(Envelope::new(
            NodeId::from_seed(2),
            Position::origin(),
            Destination::Broadcast,
            99,
            b"garbage".to_vec(),
        ));
        agent.on_message_received(Envelope::new(
            NodeId::from_seed(2),
            Position::origin(),
            Destination::Broadcast,
            PayloadType::Beacon as u8,
            b"{".to_vec(),
        ));
        assert_eq!(agent.relay().stats().malformed, 2);
    }

    fn detection_frame(seed: u64, route: &str, lane: u8, sender_at: Position) -> Envelope {
        let report = DetectionReport::new(NodeId::from_seed(seed), LaneKey::new(route, lane), Position::new(-20.0, 5.0));
        frame(
            NodeId::from_seed(seed),
            sender_at,
            Destination::Node(infra_id()),
            Payload::DetectionReport(report),
        )
    }

    #[test]
    fn test_infrastructure_congestion_round() {
        let (mut agent, ctx, radio) = infrastructure();
        for seed in 1..=6 {
            agent.on_message_received(detection_frame(seed, "1", 0, Position::new(-20.0, 5.0)));
        }
        assert_eq!(agent.occupancy().queue_depth(&LaneKey::new("1", 0)), 6);

        agent.on_tick();
        assert_eq!(count_type(&radio.take(), PayloadType::PhaseSnapshot), 1);

        ctx.now.set(Duration::from_secs(10));
        agent.on_tick();

        let sent = radio.take();
        assert_eq!(count_type(&sent, PayloadType::Directive), 6);
        assert_eq!(count_type(&sent, PayloadType::PhaseSnapshot), 1);
        assert_eq!(agent.controller().status("1", 0), Some(SignalStatus::Green));
        assert_eq!(agent.relay().stats().originated, 6);
    }

    #[test]
    fn test_infrastructure_filters_detections() {
        let (mut agent, _ctx, _radio) = infrastructure();

        // Previous hop beyond direct range
        agent.on_message_received(detection_frame(1, "1", 0, Position::new(-45.0, 0.0)));
        // Lane outside the configured approaches
        agent.on_message_received(detection_frame(2, "9", 0, Position::new(-10.0, 0.0)));

        assert_eq!(agent.occupancy().total(), 0);
    }

    #[test]
    fn test_out_of_range_detection_forgets_sender() {
        let (mut agent, _ctx, _radio) = infrastructure();
        let sender = NodeId::from_seed(1);
        agent.on_message_received(frame(
            sender,
            Position::new(-20.0, 0.0),
            Destination::Broadcast,
            Payload::Beacon(beacon_at(1, -20.0, 0.0)),
        ));
        assert!(agent.relay().neighbors().contains(&sender));

        agent.on_message_received(detection_frame(1, "1", 0, Position::new(-45.0, 0.0)));

        assert!(!agent.relay().neighbors().contains(&sender));
        assert_eq!(agent.occupancy().total(), 0);
    }

    #[test]
    fn test_late_detection_does_not_requeue_departed_vehicle() {
        let (mut agent, ctx, radio) = infrastructure();
        let lane = LaneKey::new("1", 0);
        let report = detection_frame(1, "1", 0, Position::new(-10.0, 0.0));
        agent.on_message_received(report.clone());

        let mut leaving = beacon_at(1, 10.0, 10.0);
        leaving.moving_towards_intersection = false;
        agent.on_message_received(frame(
            NodeId::from_seed(1),
            leaving.position,
            Destination::Broadcast,
            Payload::Beacon(leaving),
        ));
        // Relayed copy of the original report shows up afterwards
        agent.on_message_received(report);
        assert_eq!(agent.occupancy().queue_depth(&lane), 0);

        for secs in [0, 10, 20, 30] {
            ctx.now.set(Duration::from_secs(secs));
            agent.on_tick();
        }
        let to_departed = radio
            .take()
            .iter()
            .filter(|(e, _)| e.destination.is_node(NodeId::from_seed(1)))
            .count();
        assert_eq!(to_departed, 0);
    }

    #[test]
    fn test_infrastructure_departure_beacon_clears_lane() {
        let (mut agent, _ctx, _radio) = infrastructure();
        agent.on_message_received(detection_frame(1, "2", 1, Position::new(-10.0, 0.0)));

        let mut leaving = beacon_at(1, 10.0, 10.0);
        leaving.moving_towards_intersection = false;
        agent.on_message_received(frame(
            NodeId::from_seed(1),
            leaving.position,
            Destination::Broadcast,
            Payload::Beacon(leaving),
        ));

        assert_eq!(agent.occupancy().queue_depth(&LaneKey::new("2", 1)), 0);
        assert!(agent.relay().neighbors().contains(&NodeId::from_seed(1)));
    }

    #[test]
    fn test_infrastructure_blackout_snapshot() {
        let (mut agent, ctx, radio) = infrastructure();
        agent.controller_mut().set_off(true);
        ctx.now.set(Duration::from_secs(1));
        agent.on_tick();

        let sent = radio.take();
        let snapshot = sent
            .iter()
            .find_map(|(e, _)| match Payload::from_envelope(e) {
                Ok(Payload::PhaseSnapshot(s)) => Some(s),
                _ => None,
            })
            .unwrap();
        assert!(snapshot.is_off);
        assert_eq!(snapshot.status("3", 2), Some(SignalStatus::Blinking));
    }
}
