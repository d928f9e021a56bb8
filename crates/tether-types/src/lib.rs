//! Shared types and identifiers for tether.
//!
//! This crate defines the types used across the tether workspace:
//! identifiers ([`NodeId`], [`SpaceId`]), discovery inputs ([`Instance`],
//! [`NodeDescriptor`], [`DiscoveryEvent`]), routing state ([`Placement`]),
//! observer events ([`RingEvent`]) and the cross-node [`NodeMessage`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod error;
pub mod message;

pub use error::TypesError;
pub use message::{MessageKind, NodeMessage};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of virtual nodes each physical node places on the hash ring.
pub const DEFAULT_VNODES_PER_NODE: u16 = 100;

/// Prefix of the per-node channel that receives reset notifications.
pub const DEFAULT_RESET_CHANNEL_PREFIX: &str = "reset-channel-";

/// Discovery metadata key holding the comma-separated accepted spaces.
pub const ACCESS_SPACE_KEY: &str = "access-space";

/// Discovery metadata key holding the node's advertised connection cap.
pub const MAX_USER_NUM_KEY: &str = "max-user-num";

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

/// Identifier of a backend worker node, derived from its `host:port` address.
#[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap an already-formatted node identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the identifier of the node listening on `host:port`.
    pub fn from_addr(host: &str, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A logical traffic partition. A node accepts zero or more spaces.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(pub u32);

impl From<u32> for SpaceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for SpaceId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| TypesError::InvalidSpace(s.to_string()))
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpaceId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Discovery types
// ---------------------------------------------------------------------------

/// A connectable backend instance as reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    /// Host name or IP address.
    pub host: String,
    /// Listening port.
    pub port: u16,
}

impl Instance {
    /// Create an instance for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The node identifier this instance would register under.
    pub fn node_id(&self) -> NodeId {
        NodeId::from_addr(&self.host, self.port)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Description of a live node as delivered by the discovery feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Node identity (`host:port`).
    pub id: NodeId,
    /// Connectable address of the node.
    pub address: String,
    /// Spaces this node accepts.
    pub spaces: BTreeSet<SpaceId>,
    /// Advertised connection cap, if the node publishes one.
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl NodeDescriptor {
    /// Build a descriptor for the node at `host:port` accepting `spaces`.
    pub fn new(host: &str, port: u16, spaces: impl IntoIterator<Item = SpaceId>) -> Self {
        let id = NodeId::from_addr(host, port);
        Self {
            address: id.to_string(),
            id,
            spaces: spaces.into_iter().collect(),
            max_connections: None,
        }
    }

    /// Build a descriptor from a discovery instance and its metadata map.
    ///
    /// Reads [`ACCESS_SPACE_KEY`] as a comma-separated list of space ids
    /// (missing or blank means the node accepts nothing) and the optional
    /// [`MAX_USER_NUM_KEY`] connection cap.
    pub fn from_metadata(
        host: &str,
        port: u16,
        metadata: &HashMap<String, String>,
    ) -> Result<Self, TypesError> {
        let spaces = match metadata.get(ACCESS_SPACE_KEY) {
            Some(raw) => parse_space_list(raw)?,
            None => BTreeSet::new(),
        };

        let max_connections = metadata
            .get(MAX_USER_NUM_KEY)
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .map_err(|_| TypesError::InvalidMetadata {
                        key: MAX_USER_NUM_KEY.to_string(),
                        value: raw.clone(),
                    })
            })
            .transpose()?;

        let mut descriptor = Self::new(host, port, spaces);
        descriptor.max_connections = max_connections;
        Ok(descriptor)
    }

    /// Whether this descriptor lists `space` as accepted.
    pub fn accepts(&self, space: SpaceId) -> bool {
        self.spaces.contains(&space)
    }
}

/// Parse a comma-separated list of space ids, e.g. `"1, 2,5"`.
pub fn parse_space_list(raw: &str) -> Result<BTreeSet<SpaceId>, TypesError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<SpaceId>()
                .map_err(|_| TypesError::InvalidMetadata {
                    key: ACCESS_SPACE_KEY.to_string(),
                    value: raw.to_string(),
                })
        })
        .collect()
}

/// A membership change delivered by the discovery feed.
///
/// Events carry batches; entries of one batch are applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "nodes", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    /// New nodes came online.
    Added(Vec<NodeDescriptor>),
    /// Nodes went away.
    Removed(Vec<NodeId>),
    /// Nodes republished their metadata (accepted spaces may have changed).
    MetadataChanged(Vec<NodeDescriptor>),
}

// ---------------------------------------------------------------------------
// Routing state
// ---------------------------------------------------------------------------

/// The recorded assignment of one active connection to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Ring position derived from `"<connection_id>-<space>"`.
    pub position: u32,
    /// Identity of the connection.
    pub connection_id: String,
    /// Space the connection asked for.
    pub space: SpaceId,
    /// Node the connection is assigned to.
    pub node_id: NodeId,
}

/// Name of the reset channel for `node_id` under the given prefix.
pub fn reset_channel(prefix: &str, node_id: &NodeId) -> String {
    format!("{prefix}{node_id}")
}

/// Events broadcast by the balancer to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingEvent {
    /// A node registered and its virtual nodes were placed on the ring.
    NodeJoined(NodeId),
    /// A node was unregistered and its virtual nodes were removed.
    NodeLeft(NodeId),
    /// A node's accepted spaces changed.
    CapabilityChanged {
        /// The node whose capability changed.
        node_id: NodeId,
        /// Spaces the node newly accepts.
        added: BTreeSet<SpaceId>,
        /// Spaces the node no longer accepts.
        removed: BTreeSet<SpaceId>,
    },
    /// A rebalance pass evicted placements around a node's virtual nodes.
    Rebalanced {
        /// The node whose arcs were scanned.
        node_id: NodeId,
        /// Number of placements evicted.
        evicted: usize,
    },
    /// A ring entry pointed at a node missing from the live instances and
    /// the node was removed.
    StaleNodeRemoved(NodeId),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
