//! Radio transport abstraction for Greenwave nodes.

use crate::error::EnvError;
use crate::types::{Envelope, NodeId};

/// Link-layer selector for a single transmission.
///
/// Multi-hop decisions are made by the protocol core; the transport only
/// ever sees one-hop selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteSelector {
    /// Unicast to a node assumed to be within radio range
    Direct(NodeId),

    /// One-hop broadcast to every node in radio range
    Broadcast,
}

/// Abstraction for radio I/O between Greenwave nodes.
///
/// # Implementations
///
/// - **Simulation**: `SimRadio` - channel into a range-limited medium with
///   partitions and loss
///
/// # Packet Flow
///
/// ```text
/// Vehicle A                  Medium                   Vehicle B
///   |                           |                          |
///   |-- send(env, Direct(B)) -->|                          |
///   |                           |-- [range/loss check] --->|
///   |                           |                          |-- on_message_received(env)
/// ```
pub trait RadioTransport {
    /// Hands an envelope to the radio.
    ///
    /// # Returns
    /// * `Ok(())` - Frame queued for transmission
    /// * `Err(EnvError::NetworkError)` - Immediate send failure (e.g., radio down)
    ///
    /// # Note
    /// Success does not guarantee delivery - ad-hoc links are best effort.
    fn send(&self, envelope: Envelope, selector: RouteSelector) -> Result<(), EnvError>;

    /// Returns this node's ID.
    fn local_id(&self) -> NodeId;
}

/// Marker trait for network controllers in simulation.
///
/// Allows injecting faults like partitions and loss.
pub trait NetworkController {
    /// Creates a network partition between two node sets.
    fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets packet loss probability for a link (0.0 - 1.0).
    fn set_link_loss(&self, from: NodeId, to: NodeId, loss_rate: f64);
}
