//! Configuration for relay, signal control, vehicles and geometry.
//!
//! Every section deserializes from JSON with per-field defaults, so a
//! config file only needs to name what it changes. Durations are carried as
//! integer milliseconds.

use crate::error::ConfigError;
use crate::geometry::IntersectionGeometry;
use greenwave_env::{LaneIndex, LaneKey, NodeId, RouteId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Relay protocol parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Identity of the intersection's infrastructure node
    pub infrastructure_id: NodeId,

    /// Distance within which a direct link is assumed (meters)
    pub direct_range_m: f64,

    /// Vehicles ignore phase snapshots and directives from senders farther
    /// than this (meters)
    pub phase_accept_distance_m: f64,

    /// Maximum time a message may wait in the retry queue
    pub max_wait_ms: u64,

    /// Hop budget of newly created detection reports and directives
    pub initial_ttl: u8,
}

impl RelayConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            infrastructure_id: NodeId::from_seed(0),
            direct_range_m: 30.0,
            phase_accept_distance_m: 50.0,
            max_wait_ms: 10_000,
            initial_ttl: crate::messages::DEFAULT_TTL,
        }
    }
}

/// How the controller decides phases. Exactly one is active per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhasePolicy {
    /// Toggle the controlling route group on every interval boundary
    Timer,

    /// Force congested lanes green and their conflicts red
    OccupancyThreshold,
}

/// One approach road and how many lanes it has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approach {
    pub route: RouteId,
    pub lanes: LaneIndex,
}

impl Approach {
    pub fn new(route: impl Into<RouteId>, lanes: LaneIndex) -> Self {
        Self {
            route: route.into(),
            lanes,
        }
    }

    pub fn lane_keys(&self) -> impl Iterator<Item = LaneKey> + '_ {
        (0..self.lanes).map(move |lane| LaneKey::new(self.route.clone(), lane))
    }
}

/// Which routes may not be green at the same time.
///
/// Always symmetric: declaring "A conflicts with B" also records "B
/// conflicts with A", including when loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<RouteId, BTreeSet<RouteId>>",
    into = "BTreeMap<RouteId, BTreeSet<RouteId>>"
)]
pub struct ConflictTable {
    conflicts: BTreeMap<RouteId, BTreeSet<RouteId>>,
}

impl ConflictTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a symmetric conflict between two routes.
    pub fn add(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.conflicts.entry(a.to_string()).or_default().insert(b.to_string());
        self.conflicts.entry(b.to_string()).or_default().insert(a.to_string());
    }

    /// Builder-style: `route` conflicts with every route in `others`.
    pub fn with(mut self, route: &str, others: &[&str]) -> Self {
        for other in others {
            self.add(route, other);
        }
        self
    }

    pub fn conflicts(&self, a: &str, b: &str) -> bool {
        self.conflicts.get(a).map_or(false, |set| set.contains(b))
    }

    /// Routes that conflict with `route`, in order.
    pub fn conflicting(&self, route: &str) -> impl Iterator<Item = &RouteId> {
        self.conflicts.get(route).into_iter().flatten()
    }

    /// Every route named anywhere in the table.
    pub fn routes(&self) -> BTreeSet<&RouteId> {
        self.conflicts
            .iter()
            .flat_map(|(route, others)| std::iter::once(route).chain(others.iter()))
            .collect()
    }
}

impl From<BTreeMap<RouteId, BTreeSet<RouteId>>> for ConflictTable {
    fn from(raw: BTreeMap<RouteId, BTreeSet<RouteId>>) -> Self {
        let mut table = ConflictTable::new();
        for (route, others) in &raw {
            for other in others {
                table.add(route, other);
            }
        }
        table
    }
}

impl From<ConflictTable> for BTreeMap<RouteId, BTreeSet<RouteId>> {
    fn from(table: ConflictTable) -> Self {
        table.conflicts
    }
}

/// Signal controller parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub policy: PhasePolicy,

    /// Time between phase re-evaluations
    pub reevaluation_interval_ms: u64,

    /// A lane strictly deeper than this is congested
    pub lane_threshold: usize,

    /// Approach roads and their lane counts
    pub approaches: Vec<Approach>,

    pub conflicts: ConflictTable,

    /// Route group toggled by the timer policy
    pub controlling_routes: Vec<RouteId>,

    /// Routes that start GREEN
    pub default_green: Vec<RouteId>,

    /// Interval between periodic phase snapshot broadcasts
    pub snapshot_interval_ms: u64,

    /// Infrastructure wake-up interval
    pub tick_interval_ms: u64,
}

impl ControllerConfig {
    pub fn reevaluation_interval(&self) -> Duration {
        Duration::from_millis(self.reevaluation_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Lanes allowed for `route`, if the route is an approach.
    pub fn lanes_of(&self, route: &str) -> Option<LaneIndex> {
        self.approaches
            .iter()
            .find(|approach| approach.route == route)
            .map(|approach| approach.lanes)
    }

    /// Returns true if `key` names a configured route and a lane in bounds.
    pub fn knows_lane(&self, key: &LaneKey) -> bool {
        self.lanes_of(&key.route).map_or(false, |lanes| key.lane < lanes)
    }

    /// The reference conflict rules: route 3 conflicts with 4, 5 and 6;
    /// routes 1 and 2 conflict with 4 and 5.
    pub fn default_conflicts() -> ConflictTable {
        ConflictTable::new()
            .with("3", &["4", "5", "6"])
            .with("1", &["4", "5"])
            .with("2", &["4", "5"])
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            policy: PhasePolicy::OccupancyThreshold,
            reevaluation_interval_ms: 10_000,
            lane_threshold: 5,
            approaches: (1..=6).map(|route| Approach::new(route.to_string(), 10)).collect(),
            conflicts: Self::default_conflicts(),
            controlling_routes: vec!["1".into(), "2".into(), "3".into()],
            default_green: Vec::new(),
            snapshot_interval_ms: 1_000,
            tick_interval_ms: 100,
        }
    }
}

/// Vehicle-side parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// Vehicle wake-up interval
    pub tick_interval_ms: u64,

    /// Emit a detection report every N ticks while in a braking area
    pub detection_every_ticks: u32,

    /// A stop is only commanded within this distance of the stop point
    pub stop_trigger_distance_m: f64,
}

impl VehicleConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            detection_every_ticks: 2,
            stop_trigger_distance_m: 20.0,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreenwaveConfig {
    pub relay: RelayConfig,
    pub controller: ControllerConfig,
    pub vehicle: VehicleConfig,
    pub geometry: IntersectionGeometry,
}

impl GreenwaveConfig {
    /// Parses and validates a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: GreenwaveConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let relay = &self.relay;
        let controller = &self.controller;

        if relay.direct_range_m <= 0.0 {
            return Err(ConfigError::invalid("direct_range_m must be positive"));
        }
        if relay.initial_ttl == 0 {
            return Err(ConfigError::invalid("initial_ttl must be at least 1"));
        }
        if controller.approaches.is_empty() {
            return Err(ConfigError::invalid("at least one approach route is required"));
        }
        if let Some(approach) = controller.approaches.iter().find(|a| a.lanes == 0) {
            return Err(ConfigError::invalid(format!("route {} has no lanes", approach.route)));
        }
        for (name, value) in [
            ("reevaluation_interval_ms", controller.reevaluation_interval_ms),
            ("snapshot_interval_ms", controller.snapshot_interval_ms),
            ("controller.tick_interval_ms", controller.tick_interval_ms),
            ("vehicle.tick_interval_ms", self.vehicle.tick_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(format!("{} must be positive", name)));
            }
        }
        if self.vehicle.detection_every_ticks == 0 {
            return Err(ConfigError::invalid("detection_every_ticks must be at least 1"));
        }

        let known = |route: &str| controller.lanes_of(route).is_some();

        if let Some(route) = controller.conflicts.routes().into_iter().find(|r| !known(r.as_str())) {
            return Err(ConfigError::invalid(format!("conflict table names unknown route {}", route)));
        }
        if let Some(route) = controller.default_green.iter().find(|r| !known(r.as_str())) {
            return Err(ConfigError::invalid(format!("default-green route {} is unknown", route)));
        }
        if let Some(route) = controller.controlling_routes.iter().find(|r| !known(r.as_str())) {
            return Err(ConfigError::invalid(format!("controlling route {} is unknown", route)));
        }
        if controller.policy == PhasePolicy::Timer && controller.controlling_routes.is_empty() {
            return Err(ConfigError::invalid("timer policy needs at least one controlling route"));
        }
        if let Some((a, b)) = first_conflict(&controller.conflicts, &controller.default_green) {
            return Err(ConfigError::invalid(format!("default-green routes {} and {} conflict", a, b)));
        }
        if let Some((a, b)) = first_conflict(&controller.conflicts, &controller.controlling_routes) {
            return Err(ConfigError::invalid(format!("controlling routes {} and {} conflict", a, b)));
        }

        Ok(())
    }
}

/// First pair of routes in `group` that may not be green together.
fn first_conflict<'a>(table: &ConflictTable, group: &'a [RouteId]) -> Option<(&'a RouteId, &'a RouteId)> {
    group.iter().enumerate().find_map(|(i, a)| {
        group[i + 1..]
            .iter()
            .find(|b| table.conflicts(a, b))
            .map(|b| (a, b))
    })
}
