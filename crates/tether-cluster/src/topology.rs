//! Registry and hash ring, mutated together.

use std::collections::BTreeSet;

use tether_placement::HashRing;
use tether_types::{NodeDescriptor, NodeId, SpaceId};
use tracing::info;

use crate::error::ClusterError;
use crate::registry::{CapabilityDiff, Node, NodeRegistry};

/// The routing view: who is live, what they accept, where they sit.
///
/// Keeps the invariant that every registered node has exactly its
/// virtual-node positions on the ring, and nothing else does.
#[derive(Debug)]
pub(crate) struct Topology {
    pub(crate) registry: NodeRegistry,
    pub(crate) ring: HashRing,
}

impl Topology {
    pub(crate) fn new(vnodes_per_node: u16) -> Self {
        Self {
            registry: NodeRegistry::new(),
            ring: HashRing::new(vnodes_per_node),
        }
    }

    /// Register a node and place its virtual nodes. Returns the positions.
    pub(crate) fn add_node(&mut self, descriptor: NodeDescriptor) -> Result<Vec<u32>, ClusterError> {
        let node_id = self.registry.register(descriptor)?.id().clone();
        let positions = self.ring.insert_node(&node_id);
        self.registry.set_positions(&node_id, positions.clone())?;
        info!(%node_id, ring_size = self.ring.len(), "node added");
        Ok(positions)
    }

    /// Unregister a node and take its virtual nodes off the ring.
    pub(crate) fn remove_node(&mut self, node_id: &NodeId) -> Option<Node> {
        let node = self.registry.unregister(node_id)?;
        let removed = self.ring.remove_positions(node.positions());
        info!(%node_id, vnodes = removed, ring_size = self.ring.len(), "node removed");
        Some(node)
    }

    /// Remove `node_id` only if it is still the registration numbered
    /// `generation`. A node that left and came back is kept.
    pub(crate) fn remove_registration(&mut self, node_id: &NodeId, generation: u64) -> Option<Node> {
        if self.registry.get(node_id)?.generation() != generation {
            return None;
        }
        self.remove_node(node_id)
    }

    /// Replace a node's accepted spaces.
    pub(crate) fn update_capability(
        &mut self,
        node_id: &NodeId,
        spaces: BTreeSet<SpaceId>,
    ) -> Result<CapabilityDiff, ClusterError> {
        self.registry.update_capability(node_id, spaces)
    }

    /// Positions of a registered node's virtual nodes.
    pub(crate) fn positions_of(&self, node_id: &NodeId) -> Vec<u32> {
        self.registry
            .get(node_id)
            .map(|n| n.positions().to_vec())
            .unwrap_or_default()
    }
}
