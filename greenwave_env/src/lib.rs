//! Greenwave Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam between the Greenwave protocol
//! core and whatever drives it: the deterministic simulator in
//! `greenwave_sim`, or a real radio stack.
//!
//! # Core Concept: The Reactor Pattern
//!
//! A node never blocks and never owns a thread. Everything it needs from
//! the outside world is intercepted here:
//! - Identity and time (`node_id()`, `now()`)
//! - Wake-ups (`schedule_wakeup()`)
//! - Position and lane (`position()`, `lane()`)
//! - Radio output (`send()` with a [`RouteSelector`])
//!
//! The environment calls back into the node with `on_tick()` and
//! `on_message_received()`; all work in a callback is synchronous.
//!
//! # Example
//!
//! ```ignore
//! use greenwave_env::{NodeContext, RadioTransport, RouteSelector};
//!
//! fn on_tick<Ctx: NodeContext, Net: RadioTransport>(ctx: &Ctx, net: &Net) {
//!     ctx.schedule_wakeup(ctx.now() + Duration::from_millis(100));
//!     net.send(beacon_envelope(ctx), RouteSelector::Broadcast).ok();
//! }
//! ```

mod context;
mod network;
mod types;
mod error;

pub use context::{Kinematics, MotionCommand, NodeContext, VehicleContext};
pub use network::{NetworkController, RadioTransport, RouteSelector};
pub use types::{distance, Destination, Envelope, LaneIndex, LaneKey, NodeId, Position, RouteId};
pub use error::EnvError;
