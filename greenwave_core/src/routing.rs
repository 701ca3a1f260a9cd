//! Relay Router - one-hop forwarding decisions for multi-hop messages.
//!
//! # Algorithm
//!
//! ```text
//! Broadcast destination                  -> Broadcast
//! anchor within direct range of self     -> DeliverDirect
//! destination itself is a known neighbor -> ForwardVia(destination)
//! neighbor strictly closer to the anchor -> ForwardVia(closest neighbor)
//! otherwise                              -> Unreachable
//! ```
//!
//! The anchor is the fixed infrastructure position for infrastructure-bound
//! traffic, and the destination's last known position for vehicle-bound
//! traffic. Requiring the next hop to be strictly closer to the anchor than
//! self keeps a message from bouncing between two nodes that both fail to
//! make progress.

use crate::neighbors::NeighborTable;
use greenwave_env::{distance, Destination, NodeId, Position};
use tracing::debug;

/// Outcome of a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Destination is within direct radio range
    DeliverDirect,

    /// Hand the message to this neighbor
    ForwardVia(NodeId),

    /// One-hop broadcast
    Broadcast,

    /// No forwarding path exists right now
    Unreachable,
}

/// Optional extra input to a routing decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteHints {
    /// Fallback anchor when the destination is not in the neighbor table
    pub anchor: Option<Position>,

    /// Neighbor the message just came from; never chosen as next hop
    pub previous_hop: Option<NodeId>,
}

/// Stateless greedy router over a node's neighbor table.
#[derive(Debug, Clone)]
pub struct RelayRouter {
    infrastructure_id: NodeId,
    infrastructure_position: Position,
    direct_range: f64,
}

impl RelayRouter {
    pub fn new(infrastructure_id: NodeId, infrastructure_position: Position, direct_range: f64) -> Self {
        Self {
            infrastructure_id,
            infrastructure_position,
            direct_range,
        }
    }

    pub fn infrastructure_id(&self) -> NodeId {
        self.infrastructure_id
    }

    pub fn direct_range(&self) -> f64 {
        self.direct_range
    }

    /// Decides how to move a message one hop closer to `destination`.
    ///
    /// Prunes out-of-range neighbors first, so every decision works on a
    /// fresh table.
    pub fn route_for(
        &self,
        table: &mut NeighborTable,
        self_position: &Position,
        destination: Destination,
        hints: RouteHints,
    ) -> RouteDecision {
        let target = match destination {
            Destination::Broadcast => return RouteDecision::Broadcast,
            Destination::Node(id) => id,
        };

        table.evict_out_of_range(self_position, self.direct_range);

        let Some(anchor) = self.anchor_for(table, target, hints.anchor) else {
            debug!("No anchor for {}, cannot route", target);
            return RouteDecision::Unreachable;
        };

        let self_distance = distance(self_position, &anchor);
        if self_distance <= self.direct_range {
            return RouteDecision::DeliverDirect;
        }

        if table.contains(&target) && hints.previous_hop != Some(target) {
            return RouteDecision::ForwardVia(target);
        }

        let best = table.closest_to(&anchor, |beacon| Some(beacon.vehicle_id) != hints.previous_hop);
        match best {
            Some((next_hop, next_distance)) if next_distance < self_distance => {
                RouteDecision::ForwardVia(next_hop)
            }
            _ => RouteDecision::Unreachable,
        }
    }

    /// Resolves the position a message to `target` steers toward.
    fn anchor_for(&self, table: &NeighborTable, target: NodeId, hint: Option<Position>) -> Option<Position> {
        if target == self.infrastructure_id {
            return Some(self.infrastructure_position);
        }
        table.get(&target).map(|beacon| beacon.position).or(hint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbors::tests::beacon_at;

    fn infra() -> NodeId {
        NodeId::from_seed(1000)
    }

    fn router() -> RelayRouter {
        RelayRouter::new(infra(), Position::origin(), 30.0)
    }

    #[test]
    fn test_broadcast_always_broadcasts() {
        let mut table = NeighborTable::new();
        let decision = router().route_for(
            &mut table,
            &Position::new(500.0, 0.0),
            Destination::Broadcast,
            RouteHints::default(),
        );
        assert_eq!(decision, RouteDecision::Broadcast);
    }

    #[test]
    fn test_deliver_direct_when_in_range() {
        let mut table = NeighborTable::new();
        let decision = router().route_for(
            &mut table,
            &Position::new(20.0, 0.0),
            Destination::Node(infra()),
            RouteHints::default(),
        );
        assert_eq!(decision, RouteDecision::DeliverDirect);
    }

    #[test]
    fn test_forward_via_neighbor_closer_to_infrastructure() {
        // Self at 40 m from the infrastructure, neighbor at 10 m
        let mut table = NeighborTable::new();
        table.update(beacon_at(1, 10.0, 0.0));

        let decision = router().route_for(
            &mut table,
            &Position::new(40.0, 0.0),
            Destination::Node(infra()),
            RouteHints::default(),
        );
        assert_eq!(decision, RouteDecision::ForwardVia(NodeId::from_seed(1)));
    }

    #[test]
    fn test_unreachable_when_no_neighbor_is_closer() {
        let mut table = NeighborTable::new();
        table.update(beacon_at(1, 60.0, 0.0));

        let decision = router().route_for(
            &mut table,
            &Position::new(40.0, 0.0),
            Destination::Node(infra()),
            RouteHints::default(),
        );
        assert_eq!(decision, RouteDecision::Unreachable);
    }

    #[test]
    fn test_equal_distance_is_not_progress() {
        let mut table = NeighborTable::new();
        // In range of self, exactly as far from the anchor as self
        table.update(beacon_at(1, 32.0, 24.0));

        let decision = router().route_for(
            &mut table,
            &Position::new(40.0, 0.0),
            Destination::Node(infra()),
            RouteHints::default(),
        );
        assert_eq!(decision, RouteDecision::Unreachable);
    }

    #[test]
    fn test_previous_hop_is_never_chosen() {
        let mut table = NeighborTable::new();
        table.update(beacon_at(1, 10.0, 0.0));

        let decision = router().route_for(
            &mut table,
            &Position::new(40.0, 0.0),
            Destination::Node(infra()),
            RouteHints {
                anchor: None,
                previous_hop: Some(NodeId::from_seed(1)),
            },
        );
        assert_eq!(decision, RouteDecision::Unreachable);
    }

    #[test]
    fn test_out_of_range_neighbors_are_pruned_before_deciding() {
        let mut table = NeighborTable::new();
        // 45 m from self: beyond range even though it is near the anchor
        table.update(beacon_at(1, 5.0, 0.0));

        let decision = router().route_for(
            &mut table,
            &Position::new(50.0, 0.0),
            Destination::Node(infra()),
            RouteHints::default(),
        );
        assert_eq!(decision, RouteDecision::Unreachable);
        assert!(table.is_empty());
    }

    #[test]
    fn test_vehicle_destination_uses_reference_location() {
        // Infrastructure at the origin sending to a vehicle 50 m west
        let target = NodeId::from_seed(7);
        let mut table = NeighborTable::new();
        table.update(beacon_at(2, -25.0, 0.0));

        let decision = router().route_for(
            &mut table,
            &Position::origin(),
            Destination::Node(target),
            RouteHints {
                anchor: Some(Position::new(-50.0, 0.0)),
                previous_hop: None,
            },
        );
        assert_eq!(decision, RouteDecision::ForwardVia(NodeId::from_seed(2)));
    }

    #[test]
    fn test_vehicle_destination_in_table_is_direct() {
        let target = NodeId::from_seed(7);
        let mut table = NeighborTable::new();
        table.update(beacon_at(7, 12.0, 0.0));

        let decision = router().route_for(
            &mut table,
            &Position::origin(),
            Destination::Node(target),
            RouteHints::default(),
        );
        assert_eq!(decision, RouteDecision::DeliverDirect);
    }

    #[test]
    fn test_unknown_vehicle_without_anchor_is_unreachable() {
        let mut table = NeighborTable::new();
        table.update(beacon_at(2, 5.0, 0.0));

        let decision = router().route_for(
            &mut table,
            &Position::origin(),
            Destination::Node(NodeId::from_seed(99)),
            RouteHints::default(),
        );
        assert_eq!(decision, RouteDecision::Unreachable);
    }
}
