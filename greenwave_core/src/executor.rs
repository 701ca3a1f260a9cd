//! Vehicle Directive Executor - turns signal state into motion intent.
//!
//! A single `already_stopped` latch keeps the vehicle from oscillating:
//! a stop is commanded at most once until a GO clears it, and a resume is
//! only commanded after a stop.

use crate::geometry::StopPointTable;
use crate::messages::{Directive, PhaseSnapshot, Rule};
use greenwave_env::{distance, LaneKey, MotionCommand, Position};
use tracing::debug;

/// What the executor is reacting to.
#[derive(Debug, Clone, Copy)]
pub enum SignalInput<'a> {
    Phase(&'a PhaseSnapshot),
    Directive(&'a Directive),
}

/// The vehicle's own situation at the time of the input.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub lane: Option<LaneKey>,
    pub position: Position,
    pub moving_towards_intersection: bool,
}

/// Why an input produced no command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// Stop already commanded and not yet released
    AlreadyStopped,

    /// No stop geometry configured for the vehicle's lane
    NoStopPoint,

    /// Vehicle is moving away from the intersection
    NotApproaching,

    /// Stop point is farther than the trigger distance
    OutOfTriggerRange,

    /// GO without a preceding stop
    NothingToResume,

    /// Snapshot has no status for the vehicle's lane
    LaneNotInSnapshot,

    /// Vehicle does not know its own lane
    UnknownLane,
}

/// Outcome of one executor step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionIntent {
    Command(MotionCommand),
    NoOp(NoOpReason),
}

impl MotionIntent {
    pub fn command(&self) -> Option<MotionCommand> {
        match self {
            MotionIntent::Command(command) => Some(*command),
            MotionIntent::NoOp(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectiveExecutor {
    stop_points: StopPointTable,
    trigger_distance: f64,
    already_stopped: bool,
}

impl DirectiveExecutor {
    pub fn new(stop_points: StopPointTable, trigger_distance: f64) -> Self {
        Self {
            stop_points,
            trigger_distance,
            already_stopped: false,
        }
    }

    pub fn already_stopped(&self) -> bool {
        self.already_stopped
    }

    /// Decides the motion intent for a phase snapshot or a directive.
    pub fn on_phase_or_directive(&mut self, input: SignalInput<'_>, state: &VehicleState) -> MotionIntent {
        let rule = match input {
            SignalInput::Phase(snapshot) if snapshot.is_off => Rule::SlowDown,
            SignalInput::Phase(snapshot) => {
                let Some(lane) = &state.lane else {
                    return MotionIntent::NoOp(NoOpReason::UnknownLane);
                };
                match snapshot.status(&lane.route, lane.lane) {
                    Some(status) => status.rule(),
                    None => return MotionIntent::NoOp(NoOpReason::LaneNotInSnapshot),
                }
            }
            SignalInput::Directive(directive) => directive.rule,
        };
        self.apply(rule, state)
    }

    fn apply(&mut self, rule: Rule, state: &VehicleState) -> MotionIntent {
        match rule {
            Rule::SlowDown => MotionIntent::Command(MotionCommand::ReduceSpeed),
            Rule::Go if self.already_stopped => {
                self.already_stopped = false;
                MotionIntent::Command(MotionCommand::Resume)
            }
            Rule::Go => MotionIntent::NoOp(NoOpReason::NothingToResume),
            Rule::Stop => self.stop(state),
        }
    }

    fn stop(&mut self, state: &VehicleState) -> MotionIntent {
        if self.already_stopped {
            return MotionIntent::NoOp(NoOpReason::AlreadyStopped);
        }
        let Some(lane) = &state.lane else {
            return MotionIntent::NoOp(NoOpReason::UnknownLane);
        };
        let Some(stop_point) = self.stop_points.get(&lane.route, lane.lane) else {
            debug!("No stop point configured for lane {}", lane);
            return MotionIntent::NoOp(NoOpReason::NoStopPoint);
        };
        if !state.moving_towards_intersection {
            return MotionIntent::NoOp(NoOpReason::NotApproaching);
        }
        if distance(&state.position, &stop_point) > self.trigger_distance {
            return MotionIntent::NoOp(NoOpReason::OutOfTriggerRange);
        }

        self.already_stopped = true;
        MotionIntent::Command(MotionCommand::StopAt(stop_point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Approach, ControllerConfig};
    use crate::messages::SignalStatus;
    use crate::signal::SignalController;
    use greenwave_env::NodeId;
    use std::time::Duration;

    fn executor() -> DirectiveExecutor {
        let stops = StopPointTable::new()
            .with("1", 0, Position::new(-12.0, 5.0))
            .with("1", 1, Position::new(-10.0, 7.0));
        DirectiveExecutor::new(stops, 20.0)
    }

    fn approaching(route: &str, lane: u8) -> VehicleState {
        VehicleState {
            lane: Some(LaneKey::new(route, lane)),
            position: Position::new(-20.0, 5.0),
            moving_towards_intersection: true,
        }
    }

    fn directive(rule: Rule) -> Directive {
        Directive::new(NodeId::from_seed(1), rule, None)
    }

    fn off_snapshot() -> PhaseSnapshot {
        let lanes = vec![(LaneKey::new("1", 0), SignalStatus::Blinking)];
        PhaseSnapshot::from_lanes(NodeId::from_seed(0), lanes.iter().map(|(k, s)| (k, s)), true)
    }

    #[test]
    fn test_off_stop_go_latch_sequence() {
        let mut exec = executor();
        let state = approaching("1", 0);
        let off = off_snapshot();
        let stop = directive(Rule::Stop);
        let go = directive(Rule::Go);

        let intents = vec![
            exec.on_phase_or_directive(SignalInput::Phase(&off), &state),
            exec.on_phase_or_directive(SignalInput::Directive(&stop), &state),
            exec.on_phase_or_directive(SignalInput::Directive(&stop), &state),
            exec.on_phase_or_directive(SignalInput::Directive(&go), &state),
            exec.on_phase_or_directive(SignalInput::Directive(&go), &state),
        ];

        assert_eq!(
            intents,
            vec![
                MotionIntent::Command(MotionCommand::ReduceSpeed),
                MotionIntent::Command(MotionCommand::StopAt(Position::new(-12.0, 5.0))),
                MotionIntent::NoOp(NoOpReason::AlreadyStopped),
                MotionIntent::Command(MotionCommand::Resume),
                MotionIntent::NoOp(NoOpReason::NothingToResume),
            ]
        );

        let stops = intents
            .iter()
            .filter(|i| matches!(i.command(), Some(MotionCommand::StopAt(_))))
            .count();
        let resumes = intents
            .iter()
            .filter(|i| i.command() == Some(MotionCommand::Resume))
            .count();
        assert_eq!((stops, resumes), (1, 1));
    }

    #[test]
    fn test_slow_down_ignores_latch() {
        let mut exec = executor();
        let state = approaching("1", 0);
        exec.on_phase_or_directive(SignalInput::Directive(&directive(Rule::Stop)), &state);
        assert!(exec.already_stopped());

        let intent = exec.on_phase_or_directive(SignalInput::Directive(&directive(Rule::SlowDown)), &state);
        assert_eq!(intent, MotionIntent::Command(MotionCommand::ReduceSpeed));
        assert!(exec.already_stopped());
    }

    #[test]
    fn test_stop_without_stop_point_is_a_no_op() {
        let mut exec = executor();
        let intent = exec.on_phase_or_directive(SignalInput::Directive(&directive(Rule::Stop)), &approaching("5", 3));
        assert_eq!(intent, MotionIntent::NoOp(NoOpReason::NoStopPoint));
        assert!(!exec.already_stopped());
    }

    #[test]
    fn test_stop_requires_approach_and_proximity() {
        let mut exec = executor();
        let stop = directive(Rule::Stop);

        let mut leaving = approaching("1", 0);
        leaving.moving_towards_intersection = false;
        assert_eq!(
            exec.on_phase_or_directive(SignalInput::Directive(&stop), &leaving),
            MotionIntent::NoOp(NoOpReason::NotApproaching)
        );

        let mut far = approaching("1", 0);
        far.position = Position::new(-60.0, 5.0);
        assert_eq!(
            exec.on_phase_or_directive(SignalInput::Directive(&stop), &far),
            MotionIntent::NoOp(NoOpReason::OutOfTriggerRange)
        );
        assert!(!exec.already_stopped());
    }

    #[test]
    fn test_snapshot_round_trip_resumes_only_after_stop() {
        let config = ControllerConfig {
            approaches: vec![Approach::new("1", 2)],
            conflicts: Default::default(),
            controlling_routes: vec!["1".into()],
            ..ControllerConfig::default()
        };
        let mut controller = SignalController::new(NodeId::from_seed(0), config, 6, Duration::ZERO);
        controller.set_status("1", 0, SignalStatus::Green);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status("1", 1), Some(SignalStatus::Red));

        let state = approaching("1", 0);

        let mut fresh = executor();
        assert_eq!(
            fresh.on_phase_or_directive(SignalInput::Phase(&snapshot), &state),
            MotionIntent::NoOp(NoOpReason::NothingToResume)
        );

        let mut stopped = executor();
        stopped.on_phase_or_directive(SignalInput::Directive(&directive(Rule::Stop)), &state);
        assert_eq!(
            stopped.on_phase_or_directive(SignalInput::Phase(&snapshot), &state),
            MotionIntent::Command(MotionCommand::Resume)
        );
    }

    #[test]
    fn test_snapshot_without_own_lane() {
        let mut exec = executor();
        let snapshot = off_snapshot();
        let on = PhaseSnapshot {
            is_off: false,
            ..snapshot
        };
        let intent = exec.on_phase_or_directive(SignalInput::Phase(&on), &approaching("2", 0));
        assert_eq!(intent, MotionIntent::NoOp(NoOpReason::LaneNotInSnapshot));

        let mut unknown = approaching("1", 0);
        unknown.lane = None;
        let intent = exec.on_phase_or_directive(SignalInput::Phase(&on), &unknown);
        assert_eq!(intent, MotionIntent::NoOp(NoOpReason::UnknownLane));
    }
}
