//! Wire messages and the tagged payload codec.
//!
//! Every frame carries an explicit [`PayloadType`] tag; the receiver decodes
//! by tag and never tries the bytes against each known shape.

use crate::error::ProtocolError;
use greenwave_env::{Envelope, LaneIndex, LaneKey, NodeId, Position, RouteId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hop budget given to freshly created detection reports and directives.
pub const DEFAULT_TTL: u8 = 6;

/// Periodic self-announcement broadcast by every vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub vehicle_id: NodeId,
    pub position: Position,
    /// m/s
    pub speed: f64,
    /// radians
    pub heading: f64,
    /// m/s^2
    pub acceleration: f64,
    /// Current route and lane, if the vehicle knows them
    pub lane: Option<LaneKey>,
    pub moving_towards_intersection: bool,
}

/// "Vehicle X is in lane L of route R, near the intersection."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub vehicle_id: NodeId,
    pub route: RouteId,
    pub lane: LaneIndex,
    pub position: Position,
    pub ttl: u8,
}

impl DetectionReport {
    pub fn new(vehicle_id: NodeId, lane: LaneKey, position: Position) -> Self {
        Self {
            vehicle_id,
            route: lane.route,
            lane: lane.lane,
            position,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn lane_key(&self) -> LaneKey {
        LaneKey::new(self.route.clone(), self.lane)
    }
}

/// Signal-control decision addressed to one vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rule {
    Stop,
    SlowDown,
    Go,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub target: NodeId,
    pub rule: Rule,
    pub ttl: u8,
    /// Last known position of the target, used as the routing anchor
    pub reference_location: Option<Position>,
}

impl Directive {
    pub fn new(target: NodeId, rule: Rule, reference_location: Option<Position>) -> Self {
        Self {
            target,
            rule,
            ttl: DEFAULT_TTL,
            reference_location,
        }
    }
}

/// Per-lane signal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Red,
    Green,
    Yellow,
    /// Controller off, proceed with caution
    Blinking,
}

impl SignalStatus {
    /// The rule a vehicle in a lane with this status should follow.
    pub fn rule(self) -> Rule {
        match self {
            SignalStatus::Red => Rule::Stop,
            SignalStatus::Green => Rule::Go,
            SignalStatus::Yellow | SignalStatus::Blinking => Rule::SlowDown,
        }
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SignalStatus::Red => "RED",
            SignalStatus::Green => "GREEN",
            SignalStatus::Yellow => "YELLOW",
            SignalStatus::Blinking => "BLINKING",
        };
        f.write_str(name)
    }
}

/// Full per-lane signal state broadcast by the infrastructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub infrastructure_id: NodeId,
    /// route -> lane -> status
    pub phase_state: BTreeMap<RouteId, BTreeMap<LaneIndex, SignalStatus>>,
    pub is_off: bool,
}

impl PhaseSnapshot {
    pub fn from_lanes<'a>(
        infrastructure_id: NodeId,
        lanes: impl IntoIterator<Item = (&'a LaneKey, &'a SignalStatus)>,
        is_off: bool,
    ) -> Self {
        let mut phase_state: BTreeMap<RouteId, BTreeMap<LaneIndex, SignalStatus>> = BTreeMap::new();
        for (key, status) in lanes {
            phase_state
                .entry(key.route.clone())
                .or_default()
                .insert(key.lane, *status);
        }
        Self {
            infrastructure_id,
            phase_state,
            is_off,
        }
    }

    pub fn status(&self, route: &str, lane: LaneIndex) -> Option<SignalStatus> {
        self.phase_state.get(route).and_then(|lanes| lanes.get(&lane)).copied()
    }

    /// Number of (route, lane) pairs in the snapshot.
    pub fn lane_count(&self) -> usize {
        self.phase_state.values().map(|lanes| lanes.len()).sum()
    }
}

/// Explicit wire tag for each payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    Beacon = 1,
    DetectionReport = 2,
    Directive = 3,
    PhaseSnapshot = 4,
}

impl PayloadType {
    pub fn name(self) -> &'static str {
        match self {
            PayloadType::Beacon => "beacon",
            PayloadType::DetectionReport => "detection_report",
            PayloadType::Directive => "directive",
            PayloadType::PhaseSnapshot => "phase_snapshot",
        }
    }
}

impl TryFrom<u8> for PayloadType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(PayloadType::Beacon),
            2 => Ok(PayloadType::DetectionReport),
            3 => Ok(PayloadType::Directive),
            4 => Ok(PayloadType::PhaseSnapshot),
            other => Err(ProtocolError::UnknownPayloadTag(other)),
        }
    }
}

/// Tagged union over every payload the protocol carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Beacon(Beacon),
    DetectionReport(DetectionReport),
    Directive(Directive),
    PhaseSnapshot(PhaseSnapshot),
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Payload::Beacon(_) => PayloadType::Beacon,
            Payload::DetectionReport(_) => PayloadType::DetectionReport,
            Payload::Directive(_) => PayloadType::Directive,
            Payload::PhaseSnapshot(_) => PayloadType::PhaseSnapshot,
        }
    }

    /// Serializes the payload body. The tag travels separately.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = match self {
            Payload::Beacon(inner) => serde_json::to_vec(inner),
            Payload::DetectionReport(inner) => serde_json::to_vec(inner),
            Payload::Directive(inner) => serde_json::to_vec(inner),
            Payload::PhaseSnapshot(inner) => serde_json::to_vec(inner),
        };
        bytes.map_err(ProtocolError::Encode)
    }

    /// Decodes a payload body according to its tag.
    pub fn decode(tag: u8, bytes: &[u8]) -> Result<Self, ProtocolError> {
        let kind = PayloadType::try_from(tag)?;
        let payload = match kind {
            PayloadType::Beacon => Payload::Beacon(decode_body(kind, bytes)?),
            PayloadType::DetectionReport => Payload::DetectionReport(decode_body(kind, bytes)?),
            PayloadType::Directive => Payload::Directive(decode_body(kind, bytes)?),
            PayloadType::PhaseSnapshot => Payload::PhaseSnapshot(decode_body(kind, bytes)?),
        };
        Ok(payload)
    }

    /// Decodes the payload carried by an envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        Self::decode(envelope.payload_type, &envelope.payload)
    }
}

fn decode_body<T: DeserializeOwned>(kind: PayloadType, bytes: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|source| ProtocolError::Decode {
        kind: kind.name(),
        source,
    })
}

/// A payload that travels hop by hop and carries a TTL.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedMessage {
    Detection(DetectionReport),
    Directive(Directive),
}

impl RoutedMessage {
    pub fn ttl(&self) -> u8 {
        match self {
            RoutedMessage::Detection(report) => report.ttl,
            RoutedMessage::Directive(directive) => directive.ttl,
        }
    }

    /// Spends one hop. Returns false, leaving the TTL at zero, if the
    /// budget is already exhausted.
    pub fn consume_hop(&mut self) -> bool {
        let ttl = match self {
            RoutedMessage::Detection(report) => &mut report.ttl,
            RoutedMessage::Directive(directive) => &mut directive.ttl,
        };
        match ttl.checked_sub(1) {
            Some(next) => {
                *ttl = next;
                true
            }
            None => false,
        }
    }

    pub fn into_payload(self) -> Payload {
        match self {
            RoutedMessage::Detection(report) => Payload::DetectionReport(report),
            RoutedMessage::Directive(directive) => Payload::Directive(directive),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RoutedMessage::Detection(_) => "detection_report",
            RoutedMessage::Directive(_) => "directive",
        }
    }
}
