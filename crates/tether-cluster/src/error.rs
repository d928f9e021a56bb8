//! Error types for the cluster crate.

use tether_types::NodeId;

/// Errors produced by the registry, router and balancer.
///
/// None of these are fatal to the balancer: the discovery path logs and
/// drops `DuplicateNode` / `UnknownNode`, and "no node available" is a
/// normal routing outcome rather than an error.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// A node with this id is already registered; the existing entry wins.
    #[error("node already registered: {0}")]
    DuplicateNode(NodeId),

    /// The referenced node is not registered.
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    /// The routing request cannot be turned into a ring position.
    #[error("invalid routing key: {0}")]
    InvalidRoutingKey(String),

    /// The discovery listener has stopped.
    #[error("service stopped")]
    ServiceStopped,
}
