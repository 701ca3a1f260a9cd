//! Greenwave Deterministic Simulation Harness
//!
//! This crate runs the whole intersection (one infrastructure node and any
//! number of vehicles) in a single thread under virtual time.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advances only when the next wake-up is popped
//! - **Radio**: A shared medium with range, partitions and per-link loss
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimClock + EventQueue (wake-ups in time order)       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────┐              ┌────▼──────────┐                 │
//! │  │ Vehicle │◄────────────►│ Infrastructure│     ...         │
//! │  │  Agent  │  RadioMedium │     Agent     │                 │
//! │  └─────────┘              └───────────────┘                 │
//! │       ▲                                                     │
//! │       │                                                     │
//! │  ┌────┴──────────────────────────────┐                      │
//! │  │          VehicleBody              │                      │
//! │  │  (ground truth position/motion)   │                      │
//! │  └───────────────────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use greenwave_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::RushHour);
//! assert!(result.passed);
//! ```

mod body;
mod context;
mod error;
mod network;
mod runner;
mod scheduler;
mod world;
pub mod scenarios;

pub use body::{ApproachPath, MotionLog, VehicleBody};
pub use context::{SimClock, SimNodeContext};
pub use error::SimError;
pub use network::{MediumStats, RadioMedium, SimNetworkController, SimRadio, Transmission};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scheduler::{EventQueue, Wakeup};
pub use world::{conflicting_greens, SimConfig, SimInfrastructure, SimVehicle, SimWorld, WorldStats};
