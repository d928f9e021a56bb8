//! Node registry, routing and rebalancing for tether.
//!
//! This crate provides:
//!
//! - [`Balancer`]: the service object owning the ring, registry and
//!   placements, shared between the routing and discovery paths.
//! - [`NodeRegistry`]: live nodes and the spaces they accept.
//! - [`DiscoveryListener`]: applies discovery events in arrival order.
//! - [`ResetNotifier`]: the seam reset notifications leave through.

mod discovery;
mod error;
mod notify;
mod rebalance;
mod registry;
mod router;
mod state;
mod topology;


pub use discovery::{DiscoveryHandle, DiscoveryListener};
pub use error::ClusterError;
pub use notify::{ChannelNotifier, NullNotifier, Outbound, ResetNotifier};
pub use registry::{CapabilityDiff, Node, NodeRegistry};
pub use router::{Assignment, Route, RouteRequest};
pub use state::{ApplySummary, Balancer, BalancerConfig, ClusterStatus, NodeStatus};
