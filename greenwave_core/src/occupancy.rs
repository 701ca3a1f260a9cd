//! Lane Occupancy Tracker - which vehicles wait in which lane.

use crate::messages::{Beacon, DetectionReport};
use greenwave_env::{LaneKey, NodeId, Position};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Where a vehicle was last detected.
#[derive(Debug, Clone, PartialEq)]
struct Detection {
    lane: LaneKey,
    position: Position,
}

/// Outcome of ingesting a detection report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// First time this vehicle is seen in this lane
    Added,

    /// Already queued in this lane; position refreshed
    Refreshed,

    /// Moved here from another lane
    Moved { from: LaneKey },

    /// The vehicle already left; a late relayed copy, ignored
    Departed,
}

/// Per-(route, lane) sets of waiting vehicle ids.
///
/// A vehicle id appears in at most one lane at a time. Lane entries are
/// created lazily on first detection. A vehicle that has departed is never
/// queued again.
#[derive(Debug, Default, Clone)]
pub struct LaneOccupancyTracker {
    queues: BTreeMap<LaneKey, BTreeSet<NodeId>>,
    detections: HashMap<NodeId, Detection>,
    departed: BTreeSet<NodeId>,
}

impl LaneOccupancyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the reporting vehicle to its lane queue.
    pub fn on_detection(&mut self, report: &DetectionReport) -> DetectionOutcome {
        if self.departed.contains(&report.vehicle_id) {
            return DetectionOutcome::Departed;
        }
        let lane = report.lane_key();
        let previous = self.detections.insert(
            report.vehicle_id,
            Detection {
                lane: lane.clone(),
                position: report.position,
            },
        );

        let outcome = match previous {
            Some(prev) if prev.lane == lane => DetectionOutcome::Refreshed,
            Some(prev) => {
                self.remove_from_queue(&prev.lane, &report.vehicle_id);
                DetectionOutcome::Moved { from: prev.lane }
            }
            None => DetectionOutcome::Added,
        };

        self.queues.entry(lane).or_default().insert(report.vehicle_id);
        outcome
    }

    /// Removes a vehicle that reports it is moving away.
    ///
    /// Uses the lane from the vehicle's last detection, not the beacon's
    /// lane: by now the vehicle may have crossed into another road. A beacon
    /// from a vehicle still approaching, or from one that was never
    /// detected, changes nothing. Returns the lane it was removed from.
    pub fn on_departure_beacon(&mut self, beacon: &Beacon) -> Option<LaneKey> {
        if beacon.moving_towards_intersection {
            return None;
        }
        let detection = self.detections.remove(&beacon.vehicle_id)?;
        self.remove_from_queue(&detection.lane, &beacon.vehicle_id);
        self.departed.insert(beacon.vehicle_id);
        debug!("Vehicle {} left lane {}", beacon.vehicle_id, detection.lane);
        Some(detection.lane)
    }

    fn remove_from_queue(&mut self, lane: &LaneKey, vehicle: &NodeId) {
        if let Some(queue) = self.queues.get_mut(lane) {
            queue.remove(vehicle);
        }
    }

    /// Number of vehicles queued in a lane.
    pub fn queue_depth(&self, lane: &LaneKey) -> usize {
        self.queues.get(lane).map_or(0, |queue| queue.len())
    }

    /// Vehicles queued in a lane, in id order.
    pub fn vehicles_in(&self, lane: &LaneKey) -> impl Iterator<Item = NodeId> + '_ {
        self.queues.get(lane).into_iter().flatten().copied()
    }

    /// Lane a vehicle was last detected in.
    pub fn lane_of(&self, vehicle: &NodeId) -> Option<&LaneKey> {
        self.detections.get(vehicle).map(|d| &d.lane)
    }

    /// Position from a vehicle's last detection report.
    pub fn last_position(&self, vehicle: &NodeId) -> Option<Position> {
        self.detections.get(vehicle).map(|d| d.position)
    }

    /// Every lane that has ever had a detection, with its depth.
    pub fn depths(&self) -> impl Iterator<Item = (&LaneKey, usize)> {
        self.queues.iter().map(|(lane, queue)| (lane, queue.len()))
    }

    /// True once a vehicle has been removed by a departure beacon.
    pub fn has_departed(&self, vehicle: &NodeId) -> bool {
        self.departed.contains(vehicle)
    }

    /// Total number of queued vehicles.
    pub fn total(&self) -> usize {
        self.detections.len()
    }
}
