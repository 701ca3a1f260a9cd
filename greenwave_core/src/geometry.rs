//! Intersection geometry: braking areas and per-lane stop points.
//!
//! All coordinates are planar meters in the intersection's local frame,
//! with the infrastructure node at the origin. Projection from geographic
//! coordinates is left to the positioning collaborator.

use greenwave_env::{LaneIndex, LaneKey, Position, RouteId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Axis-aligned rectangle in which approaching vehicles report themselves.
///
/// Defined by two opposite corners, in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrakingArea {
    pub corner_a: Position,
    pub corner_b: Position,
}

impl BrakingArea {
    pub fn new(corner_a: Position, corner_b: Position) -> Self {
        Self { corner_a, corner_b }
    }

    /// Returns true if `point` lies inside the rectangle (edges included).
    pub fn contains(&self, point: &Position) -> bool {
        let min_x = self.corner_a.x.min(self.corner_b.x);
        let max_x = self.corner_a.x.max(self.corner_b.x);
        let min_y = self.corner_a.y.min(self.corner_b.y);
        let max_y = self.corner_a.y.max(self.corner_b.y);

        point.x >= min_x && point.x <= max_x && point.y >= min_y && point.y <= max_y
    }
}

/// Configured stop point per (route, lane).
///
/// Lanes without an entry have no modeled stop geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StopPointTable {
    points: BTreeMap<RouteId, BTreeMap<LaneIndex, Position>>,
}

impl StopPointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the stop point for a lane, replacing any previous one.
    pub fn insert(&mut self, key: LaneKey, point: Position) {
        self.points.entry(key.route).or_default().insert(key.lane, point);
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, route: &str, lane: LaneIndex, point: Position) -> Self {
        self.insert(LaneKey::new(route, lane), point);
        self
    }

    pub fn get(&self, route: &str, lane: LaneIndex) -> Option<Position> {
        self.points.get(route).and_then(|lanes| lanes.get(&lane)).copied()
    }

    pub fn len(&self) -> usize {
        self.points.values().map(|lanes| lanes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Static layout of the modeled intersection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionGeometry {
    /// Where the infrastructure (road side unit) stands
    pub infrastructure_position: Position,

    /// Geofenced areas in which vehicles emit detection reports
    pub braking_areas: Vec<BrakingArea>,

    /// Stop line per (route, lane)
    pub stop_points: StopPointTable,
}

impl IntersectionGeometry {
    /// Returns true if `point` is inside any braking area.
    pub fn in_braking_area(&self, point: &Position) -> bool {
        self.braking_areas.iter().any(|area| area.contains(point))
    }
}

impl Default for IntersectionGeometry {
    /// The reference intersection: two braking areas, routes 1-3 with two
    /// stop lanes and routes 4-6 with four.
    fn default() -> Self {
        let mut stop_points = StopPointTable::new();
        for route in ["1", "2", "3"] {
            stop_points.insert(LaneKey::new(route, 0), Position::new(-12.7, 5.1));
            stop_points.insert(LaneKey::new(route, 1), Position::new(-10.6, 7.3));
        }
        for route in ["4", "5", "6"] {
            stop_points.insert(LaneKey::new(route, 0), Position::new(5.6, 13.1));
            stop_points.insert(LaneKey::new(route, 1), Position::new(8.9, 11.0));
            stop_points.insert(LaneKey::new(route, 2), Position::new(11.5, 9.3));
            stop_points.insert(LaneKey::new(route, 3), Position::new(14.6, 7.7));
        }

        Self {
            infrastructure_position: Position::origin(),
            braking_areas: vec![
                BrakingArea::new(Position::new(-10.0, 3.0), Position::new(-28.6, 18.8)),
                BrakingArea::new(Position::new(-1.3, 9.2), Position::new(16.9, 17.9)),
            ],
            stop_points,
        }
    }
}
