//! Simulated radio medium with fault injection.

use greenwave_env::{distance, EnvError, Envelope, NetworkController, NodeId, Position, RadioTransport, RouteSelector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Simulated radio for one node.
///
/// Sends never block; frames wait in the medium until the world delivers
/// them.
#[derive(Debug, Clone)]
pub struct SimRadio {
    /// This node's ID
    local_id: NodeId,

    /// Sender into the shared medium
    tx: mpsc::UnboundedSender<Transmission>,
}

/// One frame handed to the medium.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub from: NodeId,
    pub envelope: Envelope,
    pub selector: RouteSelector,
}

impl RadioTransport for SimRadio {
    fn send(&self, envelope: Envelope, selector: RouteSelector) -> Result<(), EnvError> {
        let frame = Transmission {
            from: self.local_id,
            envelope,
            selector,
        };

        self.tx.send(frame).map_err(|_| EnvError::network("Radio medium closed"))
    }

    fn local_id(&self) -> NodeId {
        self.local_id
    }
}

/// Per-run accounting of the medium.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediumStats {
    /// Frames handed to the medium
    pub sent: u64,
    /// Frame copies that reached a receiver
    pub delivered: u64,
    pub dropped_range: u64,
    pub dropped_partition: u64,
    pub dropped_loss: u64,
    /// Sender or addressee no longer in the world
    pub dropped_unknown: u64,
}

/// Shared air interface.
///
/// A frame reaches a receiver only if the receiver is within `range`
/// meters of the sender, the pair is not partitioned, and the link's loss
/// roll passes.
pub struct RadioMedium {
    tx: mpsc::UnboundedSender<Transmission>,
    rx: mpsc::UnboundedReceiver<Transmission>,
    controller: SimNetworkController,
    range: f64,
    rng: ChaCha8Rng,
    stats: MediumStats,
}

impl RadioMedium {
    pub fn new(range: f64, controller: SimNetworkController, seed: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            controller,
            range,
            rng: ChaCha8Rng::seed_from_u64(seed),
            stats: MediumStats::default(),
        }
    }

    /// Creates the radio for node `id`.
    pub fn radio(&self, id: NodeId) -> SimRadio {
        SimRadio {
            local_id: id,
            tx: self.tx.clone(),
        }
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn stats(&self) -> MediumStats {
        self.stats
    }

    /// Drains every pending frame and resolves its receivers against the
    /// current node positions.
    ///
    /// Returns `(receiver, envelope)` pairs in transmission order.
    pub fn deliver(&mut self, positions: &BTreeMap<NodeId, Position>) -> Vec<(NodeId, Envelope)> {
        let mut deliveries = Vec::new();

        while let Ok(frame) = self.rx.try_recv() {
            self.stats.sent += 1;

            let Some(origin) = positions.get(&frame.from) else {
                self.stats.dropped_unknown += 1;
                continue;
            };

            match frame.selector {
                RouteSelector::Broadcast => {
                    for (id, position) in positions {
                        if *id == frame.from {
                            continue;
                        }
                        if self.admit(frame.from, *id, origin, position) {
                            deliveries.push((*id, frame.envelope.clone()));
                        }
                    }
                }
                RouteSelector::Direct(to) => match positions.get(&to) {
                    Some(position) => {
                        if self.admit(frame.from, to, origin, position) {
                            deliveries.push((to, frame.envelope));
                        }
                    }
                    None => self.stats.dropped_unknown += 1,
                },
            }
        }

        deliveries
    }

    fn admit(&mut self, from: NodeId, to: NodeId, origin: &Position, target: &Position) -> bool {
        if distance(origin, target) > self.range {
            self.stats.dropped_range += 1;
            return false;
        }
        if !self.controller.can_communicate(from, to) {
            self.stats.dropped_partition += 1;
            return false;
        }
        let loss = self.controller.get_loss(from, to);
        if loss > 0.0 && self.rng.gen::<f64>() < loss {
            self.stats.dropped_loss += 1;
            return false;
        }

        self.stats.delivered += 1;
        true
    }
}

/// Network controller for fault injection.
///
/// Clones share state, so scenarios can hold one while the medium holds
/// another.
#[derive(Debug, Clone, Default)]
pub struct SimNetworkController {
    /// Per-link packet loss rate (0.0 - 1.0)
    link_loss: Arc<Mutex<HashMap<(NodeId, NodeId), f64>>>,

    /// Loss rate for links without an override
    default_loss: Arc<Mutex<f64>>,

    /// Active partitions (nodes that cannot communicate)
    partitions: Arc<Mutex<Vec<(Vec<NodeId>, Vec<NodeId>)>>>,
}

impl SimNetworkController {
    /// Creates a new network controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the loss rate for every link without an override.
    pub fn set_default_loss(&self, loss_rate: f64) {
        *self.default_loss.lock().unwrap() = loss_rate.clamp(0.0, 1.0);
    }

    /// Checks if two nodes can communicate (not partitioned).
    pub fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        let partitions = self.partitions.lock().unwrap();

        !partitions.iter().any(|(group_a, group_b)| {
            (group_a.contains(&from) && group_b.contains(&to)) || (group_b.contains(&from) && group_a.contains(&to))
        })
    }

    /// Gets the loss rate for a link.
    pub fn get_loss(&self, from: NodeId, to: NodeId) -> f64 {
        let losses = self.link_loss.lock().unwrap();
        losses
            .get(&(from, to))
            .copied()
            .unwrap_or_else(|| *self.default_loss.lock().unwrap())
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.lock().unwrap().len()
    }
}

impl NetworkController for SimNetworkController {
    fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]) {
        let mut partitions = self.partitions.lock().unwrap();
        partitions.push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        self.partitions.lock().unwrap().clear();
    }

    fn set_link_loss(&self, from: NodeId, to: NodeId, loss_rate: f64) {
        let mut losses = self.link_loss.lock().unwrap();
        losses.insert((from, to), loss_rate.clamp(0.0, 1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenwave_env::Destination;

    fn envelope(from: NodeId) -> Envelope {
        Envelope::new(from, Position::origin(), Destination::Broadcast, 1, vec![1, 2, 3])
    }

    fn line_of_nodes() -> (Vec<NodeId>, BTreeMap<NodeId, Position>) {
        let ids: Vec<NodeId> = (1..=3).map(NodeId::from_seed).collect();
        let positions = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, Position::new(i as f64 * 40.0, 0.0)))
            .collect();
        (ids, positions)
    }

    #[test]
    fn test_network_controller_partition() {
        let controller = SimNetworkController::new();

        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);
        let c = NodeId::from_seed(3);

        // Initially all can communicate
        assert!(controller.can_communicate(a, b));
        assert!(controller.can_communicate(b, c));

        // Partition: {a} vs {b, c}
        controller.partition(&[a], &[b, c]);

        assert!(!controller.can_communicate(a, b));
        assert!(!controller.can_communicate(c, a));

        // But b and c can still talk
        assert!(controller.can_communicate(b, c));

        controller.heal_all();
        assert!(controller.can_communicate(a, b));
        assert_eq!(controller.partition_count(), 0);
    }

    #[test]
    fn test_network_controller_loss() {
        let controller = SimNetworkController::new();
        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);

        assert_eq!(controller.get_loss(a, b), 0.0);

        controller.set_default_loss(0.2);
        controller.set_link_loss(a, b, 1.5);
        assert_eq!(controller.get_loss(a, b), 1.0);

        // Reverse direction is separate
        assert_eq!(controller.get_loss(b, a), 0.2);
    }

    #[test]
    fn test_broadcast_respects_range() {
        let (ids, positions) = line_of_nodes();
        let mut medium = RadioMedium::new(50.0, SimNetworkController::new(), 7);

        medium.radio(ids[0]).send(envelope(ids[0]), RouteSelector::Broadcast).unwrap();
        let deliveries = medium.deliver(&positions);

        // Node 2 is 40 m away, node 3 is 80 m away
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, ids[1]);
        assert_eq!(medium.stats().dropped_range, 1);
    }

    #[test]
    fn test_direct_drops_on_partition_and_loss() {
        let (ids, positions) = line_of_nodes();
        let controller = SimNetworkController::new();
        let mut medium = RadioMedium::new(50.0, controller.clone(), 7);
        let radio = medium.radio(ids[1]);

        controller.partition(&[ids[1]], &[ids[0]]);
        radio.send(envelope(ids[1]), RouteSelector::Direct(ids[0])).unwrap();
        controller.set_link_loss(ids[1], ids[2], 1.0);
        radio.send(envelope(ids[1]), RouteSelector::Direct(ids[2])).unwrap();

        assert!(medium.deliver(&positions).is_empty());
        let stats = medium.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.dropped_partition, 1);
        assert_eq!(stats.dropped_loss, 1);
    }

    #[test]
    fn test_unknown_addressee() {
        let (ids, positions) = line_of_nodes();
        let mut medium = RadioMedium::new(50.0, SimNetworkController::new(), 7);

        medium
            .radio(ids[0])
            .send(envelope(ids[0]), RouteSelector::Direct(NodeId::from_seed(99)))
            .unwrap();

        assert!(medium.deliver(&positions).is_empty());
        assert_eq!(medium.stats().dropped_unknown, 1);
    }

    #[test]
    fn test_send_after_medium_closed_fails() {
        let id = NodeId::from_seed(1);
        let medium = RadioMedium::new(50.0, SimNetworkController::new(), 7);
        let radio = medium.radio(id);
        drop(medium);

        let result = radio.send(envelope(id), RouteSelector::Broadcast);
        assert!(matches!(result, Err(EnvError::NetworkError(_))));
    }
}
