//! Common types for the Greenwave environment abstraction.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a Greenwave node (vehicle or infrastructure).
///
/// Derived from a seed, so every run of a scenario assigns the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Creates a deterministic NodeId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A planar position in meters, in the intersection's local frame.
pub type Position = Point2<f64>;

/// Euclidean distance between two positions, in meters.
pub fn distance(a: &Position, b: &Position) -> f64 {
    nalgebra::distance(a, b)
}

/// Identifier of an approach road ("1".."6" at the default intersection).
pub type RouteId = String;

/// Lane index within a route, 0 = rightmost.
pub type LaneIndex = u8;

/// A single (route, lane) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LaneKey {
    pub route: RouteId,
    pub lane: LaneIndex,
}

impl LaneKey {
    pub fn new(route: impl Into<RouteId>, lane: LaneIndex) -> Self {
        Self {
            route: route.into(),
            lane,
        }
    }
}

impl std::fmt::Display for LaneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.route, self.lane)
    }
}

/// Final addressee of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// A single node, possibly several hops away
    Node(NodeId),

    /// Every node within one hop
    Broadcast,
}

impl Destination {
    /// Returns true if this destination is addressed to `id`.
    pub fn is_node(&self, id: NodeId) -> bool {
        matches!(self, Destination::Node(target) if *target == id)
    }
}

/// Envelope for packets transmitted between nodes.
///
/// This is a transport-layer wrapper - the payload bytes are opaque here
/// and decoded by the receiving node according to `payload_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Node that transmitted this frame (the previous hop)
    pub sender: NodeId,

    /// Position of the sender at transmission time
    pub sender_position: Position,

    /// Final destination of the message
    pub destination: Destination,

    /// Enumerated payload tag
    pub payload_type: u8,

    /// The encoded payload bytes
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates a new envelope.
    pub fn new(
        sender: NodeId,
        sender_position: Position,
        destination: Destination,
        payload_type: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            sender,
            sender_position,
            destination,
            payload_type,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_node_id_from_seed_is_deterministic() {
        assert_eq!(NodeId::from_seed(7), NodeId::from_seed(7));
        assert_ne!(NodeId::from_seed(7), NodeId::from_seed(8));
    }

    #[test]
    fn test_node_id_display_is_short() {
        assert_eq!(NodeId::from_seed(1).to_string().len(), 8);
    }

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert_relative_eq!(distance(&a, &b), 5.0);
    }

    #[test]
    fn test_destination_is_node() {
        let id = NodeId::from_seed(1);
        assert!(Destination::Node(id).is_node(id));
        assert!(!Destination::Node(id).is_node(NodeId::from_seed(2)));
        assert!(!Destination::Broadcast.is_node(id));
    }

    #[test]
    fn test_lane_key_ordering() {
        let mut keys = vec![LaneKey::new("2", 0), LaneKey::new("1", 1), LaneKey::new("1", 0)];
        keys.sort();
        assert_eq!(keys[0], LaneKey::new("1", 0));
        assert_eq!(keys[2].to_string(), "2/0");
    }
}
