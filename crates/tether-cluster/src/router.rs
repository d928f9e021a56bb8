//! Ring walk that picks an accepting node for a connection.
//!
//! Starting at the first virtual node strictly after the connection's
//! position, the walk visits each distinct physical node once, in ring
//! order, and stops at the first node that accepts the requested space and
//! is present in the caller's live instance list. When the walk runs off the
//! end of the ring, the lowest entry is tried once more and the walk ends
//! there: there is no second lap.

use std::collections::HashSet;

use tether_placement::{ring_hash, routing_key};
use tether_types::{Instance, NodeId, SpaceId};
use tracing::{debug, warn};

use crate::error::ClusterError;
use crate::topology::Topology;

/// A request to route one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    /// Stable identity of the connection (e.g. the authenticated user id).
    pub identity: String,
    /// Requested space.
    pub space: SpaceId,
}

impl RouteRequest {
    /// Build a request, rejecting an empty identity.
    pub fn new(identity: impl Into<String>, space: impl Into<SpaceId>) -> Result<Self, ClusterError> {
        let identity = identity.into();
        if identity.trim().is_empty() {
            return Err(ClusterError::InvalidRoutingKey(identity));
        }
        Ok(Self {
            identity,
            space: space.into(),
        })
    }

    /// Ring position of `"<identity>-<space>"`.
    pub fn position(&self) -> u32 {
        ring_hash(&routing_key(&self.identity, self.space))
    }
}

/// A successful routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Chosen node.
    pub node_id: NodeId,
    /// The live instance to proxy the connection to.
    pub instance: Instance,
    /// Ring position the placement was recorded at.
    pub position: u32,
}

/// Outcome of routing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The connection was placed on a node.
    Assigned(Assignment),
    /// No live node accepts the space, or the ring is empty.
    Unavailable,
}

impl Route {
    /// The chosen node, if any.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Route::Assigned(a) => Some(&a.node_id),
            Route::Unavailable => None,
        }
    }
}

/// Result of one ring walk.
#[derive(Debug, Default)]
pub(crate) struct Selection {
    /// First live accepting node, if one was reached.
    pub(crate) chosen: Option<NodeId>,
    /// Nodes that would have accepted but are missing from the live
    /// instance list.
    pub(crate) stale: Vec<StaleNode>,
}

impl Selection {
    fn mark_stale(&mut self, topology: &Topology, node_id: &NodeId) {
        warn!(%node_id, "ring entry has no live instance");
        if let Some(node) = topology.registry.get(node_id) {
            self.stale.push(StaleNode {
                node_id: node_id.clone(),
                generation: node.generation(),
            });
        }
    }
}

/// A registration seen by the walk without a live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StaleNode {
    pub(crate) node_id: NodeId,
    pub(crate) generation: u64,
}

enum Verdict {
    Accept,
    Decline,
    Stale,
}

fn judge<F>(topology: &Topology, node_id: &NodeId, space: SpaceId, is_live: &F) -> Verdict
where
    F: Fn(&NodeId) -> bool,
{
    if !topology.registry.accepts(node_id, space) {
        Verdict::Decline
    } else if !is_live(node_id) {
        Verdict::Stale
    } else {
        Verdict::Accept
    }
}

/// Walk the ring from `position` looking for a live node accepting `space`.
pub(crate) fn select<F>(topology: &Topology, position: u32, space: SpaceId, is_live: F) -> Selection
where
    F: Fn(&NodeId) -> bool,
{
    let mut selection = Selection::default();
    let mut visited: HashSet<&NodeId> = HashSet::with_capacity(topology.registry.len());

    for (_, node_id) in topology.ring.entries_after(position) {
        if !visited.insert(node_id) {
            continue;
        }
        match judge(topology, node_id, space, &is_live) {
            Verdict::Accept => {
                selection.chosen = Some(node_id.clone());
                return selection;
            }
            Verdict::Decline => debug!(%node_id, %space, "node declines space, moving on"),
            Verdict::Stale => selection.mark_stale(topology, node_id),
        }
    }

    // Single wrap-around check.
    debug!(position, "reached end of ring, trying first entry");
    if let Some((_, node_id)) = topology.ring.first_entry()
        && !visited.contains(node_id)
    {
        match judge(topology, node_id, space, &is_live) {
            Verdict::Accept => selection.chosen = Some(node_id.clone()),
            Verdict::Decline => {}
            Verdict::Stale => selection.mark_stale(topology, node_id),
        }
    }

    if selection.chosen.is_none() {
        debug!(position, %space, "no node accepts space");
    }
    selection
}
