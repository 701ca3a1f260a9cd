//! Signal Control State Machine - per-lane phases for one intersection.
//!
//! # States
//!
//! Every configured (route, lane) holds one of RED, GREEN, YELLOW or
//! BLINKING. There is no terminal state; the machine runs for the
//! controller's lifetime.
//!
//! # Transitions
//!
//! Re-evaluation happens on a fixed interval under exactly one policy:
//!
//! - **Timer**: toggle the controlling route group RED <-> GREEN and give
//!   the routes it conflicts with the opposite status.
//! - **Occupancy threshold**: a lane deeper than the threshold is forced
//!   GREEN and every lane of a conflicting route is forced RED. Congested
//!   lanes are served deepest first; one whose route conflicts with an
//!   already-served route waits for the next evaluation.
//!
//! After each evaluation every queued vehicle gets a directive matching its
//! lane's status (RED -> STOP, GREEN -> GO, YELLOW/BLINKING -> SLOW_DOWN).
//!
//! # Invariant
//!
//! Two conflicting routes never have GREEN lanes at the same time.

use crate::config::{ControllerConfig, PhasePolicy};
use crate::messages::{Directive, PhaseSnapshot, SignalStatus};
use crate::metrics::ControllerStats;
use crate::occupancy::LaneOccupancyTracker;
use greenwave_env::{LaneIndex, LaneKey, NodeId};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Result of one re-evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Full per-lane state after the evaluation
    pub snapshot: PhaseSnapshot,

    /// One directive per queued vehicle
    pub directives: Vec<Directive>,

    /// Lanes whose status changed, in lane order
    pub changed: Vec<LaneKey>,
}

/// Phase state machine for one intersection.
#[derive(Debug, Clone)]
pub struct SignalController {
    infrastructure_id: NodeId,
    config: ControllerConfig,
    initial_ttl: u8,
    lanes: BTreeMap<LaneKey, SignalStatus>,
    is_off: bool,
    last_evaluation: Duration,
    stats: ControllerStats,
}

impl SignalController {
    /// Creates a controller with every lane RED except default-green routes.
    pub fn new(infrastructure_id: NodeId, config: ControllerConfig, initial_ttl: u8, now: Duration) -> Self {
        let mut lanes = BTreeMap::new();
        for approach in &config.approaches {
            let initial = if config.default_green.contains(&approach.route) {
                SignalStatus::Green
            } else {
                SignalStatus::Red
            };
            for key in approach.lane_keys() {
                lanes.insert(key, initial);
            }
        }

        Self {
            infrastructure_id,
            config,
            initial_ttl,
            lanes,
            is_off: false,
            last_evaluation: now,
            stats: ControllerStats::default(),
        }
    }

    /// Status a vehicle in this lane should observe.
    pub fn status(&self, route: &str, lane: LaneIndex) -> Option<SignalStatus> {
        let key = LaneKey::new(route, lane);
        self.lanes.get(&key).map(|status| self.effective(*status))
    }

    fn effective(&self, status: SignalStatus) -> SignalStatus {
        if self.is_off {
            SignalStatus::Blinking
        } else {
            status
        }
    }

    pub fn is_off(&self) -> bool {
        self.is_off
    }

    /// Switches the controller off (every lane BLINKING) or back on.
    ///
    /// Statuses held before switching off are restored when switched on.
    pub fn set_off(&mut self, off: bool) {
        if self.is_off != off {
            info!("Signal controller switched {}", if off { "off" } else { "on" });
        }
        self.is_off = off;
    }

    /// Manually overrides one lane. Returns false for unknown lanes.
    pub fn set_status(&mut self, route: &str, lane: LaneIndex, status: SignalStatus) -> bool {
        match self.lanes.get_mut(&LaneKey::new(route, lane)) {
            Some(slot) => {
                *slot = status;
                true
            }
            None => false,
        }
    }

    pub fn policy(&self) -> PhasePolicy {
        self.config.policy
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Number of (route, lane) pairs under control.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Current state as a broadcastable snapshot.
    pub fn snapshot(&self) -> PhaseSnapshot {
        let effective: Vec<(LaneKey, SignalStatus)> = self
            .lanes
            .iter()
            .map(|(key, status)| (key.clone(), self.effective(*status)))
            .collect();
        PhaseSnapshot::from_lanes(
            self.infrastructure_id,
            effective.iter().map(|(key, status)| (key, status)),
            self.is_off,
        )
    }

    /// Returns true once a full re-evaluation interval has elapsed.
    ///
    /// The boundary is inclusive, so a tick landing exactly on the interval
    /// evaluates and the cycle does not drift by one tick per period.
    pub fn is_due(&self, now: Duration) -> bool {
        now.saturating_sub(self.last_evaluation) >= self.config.reevaluation_interval()
    }

    /// Re-evaluates if the interval has elapsed.
    pub fn on_tick(&mut self, now: Duration, occupancy: &LaneOccupancyTracker) -> Option<Evaluation> {
        if self.is_due(now) {
            Some(self.evaluate(now, occupancy))
        } else {
            None
        }
    }

    /// Applies the configured policy now and emits directives.
    pub fn evaluate(&mut self, now: Duration, occupancy: &LaneOccupancyTracker) -> Evaluation {
        self.last_evaluation = now;
        self.stats.evaluations += 1;

        let previous = self.lanes.clone();
        if !self.is_off {
            match self.config.policy {
                PhasePolicy::Timer => self.apply_timer(),
                PhasePolicy::OccupancyThreshold => self.apply_occupancy(occupancy),
            }
        }

        let changed: Vec<LaneKey> = self
            .lanes
            .iter()
            .filter(|(key, status)| previous.get(*key) != Some(*status))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &changed {
            info!(
                "Lane {} -> {}",
                key,
                self.lanes.get(key).copied().unwrap_or(SignalStatus::Red)
            );
        }
        self.stats.phase_changes += changed.len() as u64;

        let directives = self.directives_for(occupancy, &changed);
        self.stats.directives_emitted += directives.len() as u64;

        Evaluation {
            snapshot: self.snapshot(),
            directives,
            changed,
        }
    }

    /// One directive per vehicle in every lane that changed or is occupied.
    fn directives_for(&self, occupancy: &LaneOccupancyTracker, changed: &[LaneKey]) -> Vec<Directive> {
        let mut directives = Vec::new();
        for (key, status) in &self.lanes {
            if occupancy.queue_depth(key) == 0 && !changed.contains(key) {
                continue;
            }
            let rule = self.effective(*status).rule();
            for vehicle in occupancy.vehicles_in(key) {
                let mut directive = Directive::new(vehicle, rule, occupancy.last_position(&vehicle));
                directive.ttl = self.initial_ttl;
                directives.push(directive);
            }
        }
        directives
    }

    fn apply_timer(&mut self) {
        let group = self.config.controlling_routes.clone();
        let group_green = group.iter().all(|route| self.route_is(route, SignalStatus::Green));
        let (group_status, opposite) = if group_green {
            (SignalStatus::Red, SignalStatus::Green)
        } else {
            (SignalStatus::Green, SignalStatus::Red)
        };

        debug!("Timer: controlling group {:?} -> {}", group, group_status);
        for route in &group {
            self.set_route(route, group_status);
        }

        let mut others: Vec<String> = group
            .iter()
            .flat_map(|route| self.config.conflicts.conflicting(route).cloned())
            .filter(|route| !group.contains(route))
            .collect();
        others.sort();
        others.dedup();

        for route in others {
            if opposite == SignalStatus::Green && self.conflicts_with_green(&route) {
                debug!("Timer: route {} kept RED, conflicts with a green route", route);
                continue;
            }
            self.set_route(&route, opposite);
        }
    }

    fn apply_occupancy(&mut self, occupancy: &LaneOccupancyTracker) {
        let threshold = self.config.lane_threshold;
        let mut heavy: Vec<(LaneKey, usize)> = self
            .lanes
            .keys()
            .map(|key| (key.clone(), occupancy.queue_depth(key)))
            .filter(|(_, depth)| *depth > threshold)
            .collect();
        heavy.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut served: Vec<String> = Vec::new();
        for (key, depth) in heavy {
            let blocked = served
                .iter()
                .any(|route| self.config.conflicts.conflicts(route, &key.route));
            if blocked {
                debug!("Lane {} ({} waiting) deferred, conflicts with a served route", key, depth);
                continue;
            }

            debug!("Lane {} congested ({} > {}), forcing GREEN", key, depth, threshold);
            self.lanes.insert(key.clone(), SignalStatus::Green);
            let conflicting: Vec<String> = self.config.conflicts.conflicting(&key.route).cloned().collect();
            for route in conflicting {
                self.set_route(&route, SignalStatus::Red);
            }
            if !served.contains(&key.route) {
                served.push(key.route);
            }
        }
    }

    fn set_route(&mut self, route: &str, status: SignalStatus) {
        for (key, slot) in self.lanes.iter_mut() {
            if key.route == route {
                *slot = status;
            }
        }
    }

    fn route_is(&self, route: &str, status: SignalStatus) -> bool {
        let mut lanes = self.lanes.iter().filter(|(key, _)| key.route == route).peekable();
        lanes.peek().is_some() && lanes.all(|(_, s)| *s == status)
    }

    fn conflicts_with_green(&self, route: &str) -> bool {
        self.lanes.iter().any(|(key, status)| {
            *status == SignalStatus::Green && self.config.conflicts.conflicts(route, &key.route)
        })
    }
}
