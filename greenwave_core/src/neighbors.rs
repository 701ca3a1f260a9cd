//! Neighbor/Beacon table: the latest beacon heard from each nearby vehicle.

use crate::messages::Beacon;
use greenwave_env::{distance, NodeId, Position};
use std::collections::HashMap;

/// Recently-heard peers keyed by vehicle id.
///
/// The most recent beacon per id wins. Entries are pruned by distance, not
/// by age: a peer is forgotten once it is farther than the radio range.
#[derive(Debug, Default, Clone)]
pub struct NeighborTable {
    entries: HashMap<NodeId, Beacon>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry for `beacon.vehicle_id`.
    pub fn update(&mut self, beacon: Beacon) {
        self.entries.insert(beacon.vehicle_id, beacon);
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<Beacon> {
        self.entries.remove(id)
    }

    /// Drops every entry farther than `max_range` from `self_position`.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_out_of_range(&mut self, self_position: &Position, max_range: f64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, beacon| distance(&beacon.position, self_position) <= max_range);
        before - self.entries.len()
    }

    /// Returns the id of the entry closest to `target` among those matching
    /// `filter`, with its distance. Ties go to the smaller id.
    pub fn closest_to<F>(&self, target: &Position, filter: F) -> Option<(NodeId, f64)>
    where
        F: Fn(&Beacon) -> bool,
    {
        self.entries
            .values()
            .filter(|beacon| filter(beacon))
            .map(|beacon| (beacon.vehicle_id, distance(&beacon.position, target)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
    }

    pub fn get(&self, id: &NodeId) -> Option<&Beacon> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Beacon> {
        self.entries.values()
    }
}
