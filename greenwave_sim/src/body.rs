//! Ground truth for simulated vehicles.
//!
//! Every vehicle drives a straight approach path: from its spawn point,
//! through its lane's stop point and the intersection center, out the
//! other side. Motion commands from the directive executor act directly on
//! the body. Parked bodies (relays, the infrastructure) never move.

use greenwave_env::{Kinematics, LaneKey, MotionCommand, Position};
use nalgebra::Vector2;
use serde::Serialize;

/// Speed multiplier while proceeding with caution.
const CAUTION_FACTOR: f64 = 0.5;

/// Straight path through one lane's stop point.
#[derive(Debug, Clone, PartialEq)]
pub struct ApproachPath {
    pub start: Position,
    /// Unit vector of travel
    pub direction: Vector2<f64>,
    /// Distance from `start` to the stop point
    pub stop_progress: f64,
    /// Distance from `start` to the intersection center
    pub center_progress: f64,
    /// Total drivable distance
    pub length: f64,
}

impl ApproachPath {
    /// Path entering `approach_m` before `stop_point` and leaving `exit_m`
    /// past `center`. None if the stop point sits on the center.
    pub fn through(stop_point: Position, center: Position, approach_m: f64, exit_m: f64) -> Option<Self> {
        let inward = center - stop_point;
        let to_center = inward.norm();
        if to_center <= f64::EPSILON {
            return None;
        }
        let direction = inward / to_center;

        Some(Self {
            start: stop_point - direction * approach_m,
            direction,
            stop_progress: approach_m,
            center_progress: approach_m + to_center,
            length: approach_m + to_center + exit_m,
        })
    }

    pub fn point_at(&self, progress: f64) -> Position {
        self.start + self.direction * progress
    }

    /// Distance along the path of the point closest to `point`.
    pub fn project(&self, point: &Position) -> f64 {
        (point - self.start).dot(&self.direction)
    }

    pub fn heading(&self) -> f64 {
        self.direction.y.atan2(self.direction.x)
    }
}

/// Motion commands a body has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MotionLog {
    pub stops: u64,
    pub resumes: u64,
    pub slowdowns: u64,
}

impl std::ops::AddAssign for MotionLog {
    fn add_assign(&mut self, other: Self) {
        self.stops += other.stops;
        self.resumes += other.resumes;
        self.slowdowns += other.slowdowns;
    }
}

#[derive(Debug, Clone)]
enum Motion {
    Parked {
        position: Position,
        moving_towards: bool,
    },
    Driving {
        path: ApproachPath,
        progress: f64,
        cruise_speed: f64,
        speed: f64,
        acceleration: f64,
        speed_factor: f64,
        stop_at: Option<f64>,
    },
}

/// One simulated node's physical state.
#[derive(Debug, Clone)]
pub struct VehicleBody {
    pub lane: Option<LaneKey>,
    pub log: MotionLog,
    motion: Motion,
}

impl VehicleBody {
    /// A body that never moves.
    pub fn parked(position: Position, lane: Option<LaneKey>, moving_towards: bool) -> Self {
        Self {
            lane,
            log: MotionLog::default(),
            motion: Motion::Parked {
                position,
                moving_towards,
            },
        }
    }

    /// A body driving `path` at `cruise_speed` m/s.
    pub fn driving(path: ApproachPath, lane: LaneKey, cruise_speed: f64) -> Self {
        Self {
            lane: Some(lane),
            log: MotionLog::default(),
            motion: Motion::Driving {
                path,
                progress: 0.0,
                cruise_speed,
                speed: cruise_speed,
                acceleration: 0.0,
                speed_factor: 1.0,
                stop_at: None,
            },
        }
    }

    pub fn position(&self) -> Position {
        match &self.motion {
            Motion::Parked { position, .. } => *position,
            Motion::Driving { path, progress, .. } => path.point_at(*progress),
        }
    }

    pub fn kinematics(&self) -> Kinematics {
        match &self.motion {
            Motion::Parked { .. } => Kinematics::default(),
            Motion::Driving {
                path,
                speed,
                acceleration,
                ..
            } => Kinematics {
                speed: *speed,
                heading: path.heading(),
                acceleration: *acceleration,
            },
        }
    }

    /// True until the body passes the intersection center.
    pub fn moving_towards_intersection(&self) -> bool {
        match &self.motion {
            Motion::Parked { moving_towards, .. } => *moving_towards,
            Motion::Driving { path, progress, .. } => *progress < path.center_progress,
        }
    }

    /// True once the body has driven its whole path.
    pub fn has_exited(&self) -> bool {
        match &self.motion {
            Motion::Parked { .. } => false,
            Motion::Driving { path, progress, .. } => *progress >= path.length,
        }
    }

    /// True while holding at a commanded stop point.
    pub fn is_stopped(&self) -> bool {
        matches!(&self.motion, Motion::Driving { stop_at: Some(_), speed, .. } if *speed == 0.0)
    }

    pub fn apply(&mut self, command: MotionCommand) {
        match command {
            MotionCommand::StopAt(_) => self.log.stops += 1,
            MotionCommand::ReduceSpeed => self.log.slowdowns += 1,
            MotionCommand::Resume => self.log.resumes += 1,
        }

        let Motion::Driving {
            path,
            progress,
            speed_factor,
            stop_at,
            ..
        } = &mut self.motion
        else {
            return;
        };

        match command {
            MotionCommand::StopAt(point) => *stop_at = Some(path.project(&point).max(*progress)),
            MotionCommand::ReduceSpeed => {
                *stop_at = None;
                *speed_factor = CAUTION_FACTOR;
            }
            MotionCommand::Resume => {
                *stop_at = None;
                *speed_factor = 1.0;
            }
        }
    }

    /// Advances the body by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let Motion::Driving {
            progress,
            cruise_speed,
            speed,
            acceleration,
            speed_factor,
            stop_at,
            ..
        } = &mut self.motion
        else {
            return;
        };

        let previous_speed = *speed;
        let previous_progress = *progress;
        *progress += *cruise_speed * *speed_factor * dt;
        if let Some(target) = stop_at {
            if *progress > *target {
                *progress = previous_progress.max(*target);
            }
        }
        *speed = (*progress - previous_progress) / dt;
        *acceleration = (*speed - previous_speed) / dt;
    }
}
