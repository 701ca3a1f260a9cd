//! Relay Service - the node-local half of the multi-hop protocol.
//!
//! Owns the neighbor table, the router and the retry queue, and is the one
//! place where both message bounds apply: every transmission spends one hop
//! of TTL, and every parked message is bounded by the maximum wait. The
//! first send and every retry go through the same path.

use crate::config::RelayConfig;
use crate::error::ProtocolError;
use crate::messages::{Beacon, Payload, RoutedMessage};
use crate::metrics::RelayStats;
use crate::neighbors::NeighborTable;
use crate::retry_queue::{DrainReport, QueuedMessage, RetryAttempt, RetryQueue};
use crate::routing::{RelayRouter, RouteDecision, RouteHints};
use greenwave_env::{distance, Destination, Envelope, NodeId, Position, RadioTransport, RouteSelector};
use std::time::Duration;
use tracing::{debug, warn};

/// What happened to a routed message handed to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transmitted one hop; carries the routing decision taken
    Sent(RouteDecision),

    /// No path right now, parked in the retry queue
    Queued,

    /// Hop budget exhausted, silently dropped
    Expired,
}

/// Result of a single routing + transmission attempt.
enum Attempt {
    Sent(RouteDecision),
    Unreachable,
    Expired,
}

#[derive(Debug)]
pub struct RelayService {
    node_id: NodeId,
    direct_range: f64,
    neighbors: NeighborTable,
    router: RelayRouter,
    retry: RetryQueue,
    stats: RelayStats,
}

impl RelayService {
    pub fn new(node_id: NodeId, config: &RelayConfig, infrastructure_position: Position) -> Self {
        Self {
            node_id,
            direct_range: config.direct_range_m,
            neighbors: NeighborTable::new(),
            router: RelayRouter::new(config.infrastructure_id, infrastructure_position, config.direct_range_m),
            retry: RetryQueue::new(config.max_wait()),
            stats: RelayStats::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn infrastructure_id(&self) -> NodeId {
        self.router.infrastructure_id()
    }

    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn queued(&self) -> usize {
        self.retry.len()
    }

    /// Final addressee of a routed message.
    pub fn destination_of(&self, message: &RoutedMessage) -> NodeId {
        match message {
            RoutedMessage::Detection(_) => self.router.infrastructure_id(),
            RoutedMessage::Directive(directive) => directive.target,
        }
    }

    /// Records a beacon heard from a neighbor.
    ///
    /// A beacon from beyond radio range removes the sender instead. Returns
    /// true if the sender is now in the table.
    pub fn on_beacon(&mut self, beacon: &Beacon, self_position: &Position) -> bool {
        if distance(&beacon.position, self_position) <= self.direct_range {
            self.neighbors.update(beacon.clone());
            true
        } else {
            self.neighbors.remove(&beacon.vehicle_id);
            false
        }
    }

    /// Drops a neighbor known to be out of range.
    pub fn forget(&mut self, id: &NodeId) -> bool {
        self.neighbors.remove(id).is_some()
    }

    /// Counts a frame that could not be decoded.
    pub fn record_malformed(&mut self) {
        self.stats.malformed += 1;
    }

    /// Sends a message this node created.
    pub fn originate<N: RadioTransport>(
        &mut self,
        message: RoutedMessage,
        now: Duration,
        self_position: &Position,
        net: &N,
    ) -> Result<SendOutcome, ProtocolError> {
        self.stats.originated += 1;
        self.send_routed(message, None, now, self_position, net)
    }

    /// Moves a routed message one hop closer to its destination.
    ///
    /// `previous_hop` is the neighbor it arrived from, never chosen as the
    /// next hop. Unreachable messages are queued; expired ones dropped.
    pub fn send_routed<N: RadioTransport>(
        &mut self,
        mut message: RoutedMessage,
        previous_hop: Option<NodeId>,
        now: Duration,
        self_position: &Position,
        net: &N,
    ) -> Result<SendOutcome, ProtocolError> {
        let destination = self.destination_of(&message);
        let mut link = Link {
            node_id: self.node_id,
            self_position,
            neighbors: &mut self.neighbors,
            router: &self.router,
            stats: &mut self.stats,
        };

        match link.attempt(&mut message, destination, previous_hop, net)? {
            Attempt::Sent(decision) => Ok(SendOutcome::Sent(decision)),
            Attempt::Expired => Ok(SendOutcome::Expired),
            Attempt::Unreachable => {
                debug!("No path to {} for {}, queueing", destination, message.kind());
                self.stats.queued += 1;
                self.retry.enqueue(QueuedMessage {
                    message,
                    destination,
                    previous_hop,
                    enqueued_at: now,
                });
                Ok(SendOutcome::Queued)
            }
        }
    }

    /// Retries every parked message once. Called on every tick.
    pub fn drain<N: RadioTransport>(&mut self, now: Duration, self_position: &Position, net: &N) -> DrainReport {
        if self.retry.is_empty() {
            return DrainReport::default();
        }

        let mut link = Link {
            node_id: self.node_id,
            self_position,
            neighbors: &mut self.neighbors,
            router: &self.router,
            stats: &mut self.stats,
        };

        let report = self.retry.drain_and_retry(now, |queued| {
            match link.attempt(&mut queued.message, queued.destination, queued.previous_hop, net) {
                Ok(Attempt::Sent(_)) => RetryAttempt::Sent,
                Ok(Attempt::Unreachable) => RetryAttempt::Unreachable,
                Ok(Attempt::Expired) => RetryAttempt::Dropped,
                Err(e) => {
                    warn!("Retry of {} to {} failed: {}", queued.message.kind(), queued.destination, e);
                    RetryAttempt::Dropped
                }
            }
        });

        self.stats.retried += report.forwarded as u64;
        self.stats.expired_wait += report.expired as u64;
        report
    }

    /// One-hop broadcast of a beacon or phase snapshot.
    pub fn broadcast<N: RadioTransport>(
        &mut self,
        payload: &Payload,
        self_position: &Position,
        net: &N,
    ) -> Result<(), ProtocolError> {
        let envelope = Envelope::new(
            self.node_id,
            *self_position,
            Destination::Broadcast,
            payload.payload_type() as u8,
            payload.encode()?,
        );
        net.send(envelope, RouteSelector::Broadcast)?;
        self.stats.broadcasts += 1;
        Ok(())
    }
}

/// Disjoint borrows of the service state needed to attempt one hop, so the
/// retry queue can be drained while routing through the rest.
struct Link<'a> {
    node_id: NodeId,
    self_position: &'a Position,
    neighbors: &'a mut NeighborTable,
    router: &'a RelayRouter,
    stats: &'a mut RelayStats,
}

impl Link<'_> {
    fn attempt<N: RadioTransport>(
        &mut self,
        message: &mut RoutedMessage,
        destination: NodeId,
        previous_hop: Option<NodeId>,
        net: &N,
    ) -> Result<Attempt, ProtocolError> {
        // An exhausted message is never parked
        if message.ttl() == 0 {
            debug!("Dropping {} for {}: TTL exhausted", message.kind(), destination);
            self.stats.expired_ttl += 1;
            return Ok(Attempt::Expired);
        }

        let hints = RouteHints {
            anchor: match message {
                RoutedMessage::Directive(directive) => directive.reference_location,
                RoutedMessage::Detection(_) => None,
            },
            previous_hop,
        };

        let decision = self.router.route_for(
            self.neighbors,
            self.self_position,
            Destination::Node(destination),
            hints,
        );
        let selector = match decision {
            RouteDecision::DeliverDirect => RouteSelector::Direct(destination),
            RouteDecision::ForwardVia(next_hop) => RouteSelector::Direct(next_hop),
            RouteDecision::Broadcast => RouteSelector::Broadcast,
            RouteDecision::Unreachable => return Ok(Attempt::Unreachable),
        };

        if !message.consume_hop() {
            debug!("Dropping {} for {}: TTL exhausted", message.kind(), destination);
            self.stats.expired_ttl += 1;
            return Ok(Attempt::Expired);
        }

        let payload = message.clone().into_payload();
        let envelope = Envelope::new(
            self.node_id,
            *self.self_position,
            Destination::Node(destination),
            payload.payload_type() as u8,
            payload.encode()?,
        );
        net.send(envelope, selector)?;

        match decision {
            RouteDecision::DeliverDirect => self.stats.delivered_direct += 1,
            RouteDecision::Broadcast => self.stats.broadcasts += 1,
            _ => self.stats.forwarded += 1,
        }
        debug!("{} for {} sent via {:?} (ttl {})", message.kind(), destination, decision, message.ttl());
        Ok(Attempt::Sent(decision))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::messages::{DetectionReport, Directive, Rule};
    use crate::neighbors::tests::beacon_at;
    use greenwave_env::{EnvError, LaneKey};
    use proptest::prelude::*;
    use std::cell::RefCell;

    /// Transport that records every frame instead of sending it.
    pub(crate) struct RecordingRadio {
        pub id: NodeId,
        pub sent: RefCell<Vec<(Envelope, RouteSelector)>>,
    }

    impl RecordingRadio {
        pub(crate) fn new(id: NodeId) -> Self {
            Self {
                id,
                sent: RefCell::new(Vec::new()),
            }
        }

        pub(crate) fn take(&self) -> Vec<(Envelope, RouteSelector)> {
            std::mem::take(&mut *self.sent.borrow_mut())
        }
    }

    impl RadioTransport for RecordingRadio {
        fn send(&self, envelope: Envelope, selector: RouteSelector) -> Result<(), EnvError> {
            self.sent.borrow_mut().push((envelope, selector));
            Ok(())
        }

        fn local_id(&self) -> NodeId {
            self.id
        }
    }

    fn infra() -> NodeId {
        RelayConfig::default().infrastructure_id
    }

    fn service(seed: u64) -> RelayService {
        RelayService::new(NodeId::from_seed(seed), &RelayConfig::default(), Position::origin())
    }

    fn detection(ttl: u8) -> RoutedMessage {
        let mut report = DetectionReport::new(NodeId::from_seed(1), LaneKey::new("1", 0), Position::new(-20.0, 5.0));
        report.ttl = ttl;
        RoutedMessage::Detection(report)
    }

    #[test]
    fn test_originate_spends_one_hop() {
        let mut relay = service(1);
        let radio = RecordingRadio::new(NodeId::from_seed(1));

        let outcome = relay
            .originate(detection(6), Duration::ZERO, &Position::new(20.0, 0.0), &radio)
            .unwrap();

        assert_eq!(outcome, SendOutcome::Sent(RouteDecision::DeliverDirect));
        let sent = radio.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, RouteSelector::Direct(infra()));
        match Payload::from_envelope(&sent[0].0).unwrap() {
            Payload::DetectionReport(report) => assert_eq!(report.ttl, 5),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(relay.stats().originated, 1);
        assert_eq!(relay.stats().delivered_direct, 1);
    }

    #[test]
    fn test_zero_ttl_is_dropped_silently() {
        let mut relay = service(1);
        let radio = RecordingRadio::new(NodeId::from_seed(1));

        let outcome = relay
            .send_routed(detection(0), None, Duration::ZERO, &Position::new(20.0, 0.0), &radio)
            .unwrap();

        assert_eq!(outcome, SendOutcome::Expired);
        assert!(radio.take().is_empty());
        assert_eq!(relay.stats().expired_ttl, 1);
    }

    #[test]
    fn test_zero_ttl_without_route_is_not_queued() {
        let mut relay = service(1);
        let radio = RecordingRadio::new(NodeId::from_seed(1));
        let me = Position::new(40.0, 0.0);

        let outcome = relay
            .send_routed(detection(0), Some(NodeId::from_seed(3)), Duration::ZERO, &me, &radio)
            .unwrap();

        assert_eq!(outcome, SendOutcome::Expired);
        assert_eq!(relay.queued(), 0);
        assert_eq!(relay.stats().queued, 0);
        assert_eq!(relay.stats().expired_ttl, 1);
        assert!(radio.take().is_empty());
    }

    #[test]
    fn test_unreachable_is_queued_then_retried() {
        let mut relay = service(1);
        let radio = RecordingRadio::new(NodeId::from_seed(1));
        let me = Position::new(40.0, 0.0);

        let outcome = relay.originate(detection(6), Duration::ZERO, &me, &radio).unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
        assert_eq!(relay.queued(), 1);

        // A neighbor closer to the infrastructure shows up
        assert!(relay.on_beacon(&beacon_at(2, 15.0, 0.0), &me));
        let report = relay.drain(Duration::from_secs(1), &me, &radio);

        assert_eq!(report.forwarded, 1);
        assert_eq!(relay.queued(), 0);
        let sent = radio.take();
        assert_eq!(sent[0].1, RouteSelector::Direct(NodeId::from_seed(2)));
        assert_eq!(relay.stats().retried, 1);
        assert_eq!(relay.stats().forwarded, 1);
    }

    #[test]
    fn test_queued_message_expires_after_max_wait() {
        let mut relay = service(1);
        let radio = RecordingRadio::new(NodeId::from_seed(1));
        let me = Position::new(40.0, 0.0);

        relay.originate(detection(6), Duration::ZERO, &me, &radio).unwrap();
        relay.drain(Duration::from_secs(5), &me, &radio);
        assert_eq!(relay.queued(), 1);

        relay.on_beacon(&beacon_at(2, 15.0, 0.0), &me);
        let report = relay.drain(Duration::from_millis(10_001), &me, &radio);

        assert_eq!(report.expired, 1);
        assert!(radio.take().is_empty());
        assert_eq!(relay.stats().expired_wait, 1);
    }

    #[test]
    fn test_previous_hop_is_excluded() {
        let mut relay = service(1);
        let radio = RecordingRadio::new(NodeId::from_seed(1));
        let me = Position::new(40.0, 0.0);
        relay.on_beacon(&beacon_at(2, 15.0, 0.0), &me);

        let outcome = relay
            .send_routed(detection(6), Some(NodeId::from_seed(2)), Duration::ZERO, &me, &radio)
            .unwrap();
        assert_eq!(outcome, SendOutcome::Queued);
    }

    #[test]
    fn test_directive_routes_toward_reference_location() {
        // Infrastructure at the origin, target 50 m west, relay 25 m west
        let mut relay = service(0);
        let radio = RecordingRadio::new(infra());
        relay.on_beacon(&beacon_at(2, -25.0, 0.0), &Position::origin());

        let directive = Directive::new(NodeId::from_seed(7), Rule::Stop, Some(Position::new(-50.0, 0.0)));
        let outcome = relay
            .originate(RoutedMessage::Directive(directive), Duration::ZERO, &Position::origin(), &radio)
            .unwrap();

        assert_eq!(outcome, SendOutcome::Sent(RouteDecision::ForwardVia(NodeId::from_seed(2))));
        let sent = radio.take();
        let (envelope, _) = &sent[0];
        assert!(envelope.destination.is_node(NodeId::from_seed(7)));
    }

    #[test]
    fn test_far_beacon_removes_neighbor() {
        let mut relay = service(1);
        let me = Position::origin();
        assert!(relay.on_beacon(&beacon_at(2, 10.0, 0.0), &me));
        assert!(!relay.on_beacon(&beacon_at(2, 100.0, 0.0), &me));
        assert!(relay.neighbors().is_empty());
    }

    #[test]
    fn test_broadcast_frames() {
        let mut relay = service(1);
        let radio = RecordingRadio::new(NodeId::from_seed(1));
        relay
            .broadcast(&Payload::Beacon(beacon_at(1, 3.0, 4.0)), &Position::new(3.0, 4.0), &radio)
            .unwrap();

        let sent = radio.take();
        assert_eq!(sent[0].1, RouteSelector::Broadcast);
        assert_eq!(sent[0].0.destination, Destination::Broadcast);
        assert_eq!(relay.stats().broadcasts, 1);
    }

    proptest! {
        #[test]
        fn prop_ttl_after_n_hops(initial_ttl in 1u8..=10, hops in 0usize..16) {
            // Every hop is within direct range, so each attempt transmits
            let radio = RecordingRadio::new(NodeId::from_seed(1));
            let me = Position::new(10.0, 0.0);
            let mut message = detection(initial_ttl);
            let mut transmitted = 0usize;

            for hop in 0..hops {
                let mut relay = service(hop as u64 + 1);
                match relay.send_routed(message.clone(), None, Duration::ZERO, &me, &radio).unwrap() {
                    SendOutcome::Sent(_) => {
                        transmitted += 1;
                        let (envelope, _) = radio.take().remove(0);
                        message = match Payload::from_envelope(&envelope).unwrap() {
                            Payload::DetectionReport(report) => RoutedMessage::Detection(report),
                            other => panic!("unexpected payload {:?}", other),
                        };
                    }
                    SendOutcome::Expired => break,
                    SendOutcome::Queued => panic!("in-range hop was queued"),
                }
            }

            prop_assert!(transmitted <= initial_ttl as usize);
            prop_assert_eq!(transmitted, hops.min(initial_ttl as usize));
            prop_assert_eq!(message.ttl() as usize, initial_ttl as usize - transmitted);
        }
    }
}
