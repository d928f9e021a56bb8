//! Live node registry and capability model.
//!
//! The registry knows which nodes exist, which spaces each accepts and where
//! each node's virtual nodes sit on the ring. It owns no ring state itself:
//! positions are handed in by the caller after inserting into the
//! [`HashRing`](tether_placement::HashRing).

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use tether_types::{NodeDescriptor, NodeId, SpaceId};
use tracing::debug;

use crate::error::ClusterError;

/// A registered node.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    address: String,
    spaces: BTreeSet<SpaceId>,
    max_connections: Option<u32>,
    /// Registration counter value; a re-registered id gets a new one.
    generation: u64,
    /// Ring positions of this node's virtual nodes, in index order.
    positions: Vec<u32>,
    /// Live placements currently assigned here. Updated under the shared
    /// topology guard by the routing path, hence atomic.
    placements: AtomicUsize,
}

impl Node {
    fn from_descriptor(descriptor: NodeDescriptor, generation: u64) -> Self {
        Self {
            id: descriptor.id,
            address: descriptor.address,
            spaces: descriptor.spaces,
            max_connections: descriptor.max_connections,
            generation,
            positions: Vec::new(),
            placements: AtomicUsize::new(0),
        }
    }

    /// Node identity.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Connectable address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Accepted spaces.
    pub fn spaces(&self) -> &BTreeSet<SpaceId> {
        &self.spaces
    }

    /// Advertised connection cap.
    pub fn max_connections(&self) -> Option<u32> {
        self.max_connections
    }

    /// Which registration of this id the node is.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ring positions of this node's virtual nodes.
    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    /// Whether this node accepts `space`.
    pub fn accepts(&self, space: SpaceId) -> bool {
        self.spaces.contains(&space)
    }

    /// Number of live placements assigned to this node.
    pub fn placements(&self) -> usize {
        self.placements.load(Ordering::Relaxed)
    }

    pub(crate) fn placement_added(&self) {
        self.placements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn placement_released(&self) {
        let _ = self
            .placements
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

/// Result of replacing a node's accepted spaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityDiff {
    /// Spaces in the new set but not the old one.
    pub added: BTreeSet<SpaceId>,
    /// Spaces in the old set but not the new one.
    pub removed: BTreeSet<SpaceId>,
}

impl CapabilityDiff {
    /// Whether the accepted set changed at all.
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Registry of live nodes keyed by id.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, Node>,
    next_generation: u64,
}

impl NodeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node.
    ///
    /// Fails with [`ClusterError::DuplicateNode`] if the id is taken; the
    /// existing registration is left untouched.
    pub fn register(&mut self, descriptor: NodeDescriptor) -> Result<&mut Node, ClusterError> {
        if self.nodes.contains_key(&descriptor.id) {
            return Err(ClusterError::DuplicateNode(descriptor.id));
        }
        let id = descriptor.id.clone();
        let generation = self.next_generation;
        self.next_generation += 1;
        debug!(node_id = %id, generation, spaces = ?descriptor.spaces, "registering node");
        Ok(self
            .nodes
            .entry(id)
            .or_insert_with(|| Node::from_descriptor(descriptor, generation)))
    }

    /// Record the ring positions created for `node_id`.
    pub fn set_positions(&mut self, node_id: &NodeId, positions: Vec<u32>) -> Result<(), ClusterError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ClusterError::UnknownNode(node_id.clone()))?;
        node.positions = positions;
        Ok(())
    }

    /// Remove a node. Returns `None` if there was nothing to remove.
    pub fn unregister(&mut self, node_id: &NodeId) -> Option<Node> {
        let removed = self.nodes.remove(node_id);
        if removed.is_none() {
            debug!(%node_id, "nothing to remove");
        }
        removed
    }

    /// Replace the accepted spaces of `node_id` and report the difference.
    pub fn update_capability(
        &mut self,
        node_id: &NodeId,
        spaces: BTreeSet<SpaceId>,
    ) -> Result<CapabilityDiff, ClusterError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ClusterError::UnknownNode(node_id.clone()))?;

        let diff = CapabilityDiff {
            added: spaces.difference(&node.spaces).copied().collect(),
            removed: node.spaces.difference(&spaces).copied().collect(),
        };
        node.spaces = spaces;
        Ok(diff)
    }

    /// Refresh the advertised connection cap of `node_id`.
    pub fn set_max_connections(
        &mut self,
        node_id: &NodeId,
        max_connections: Option<u32>,
    ) -> Result<(), ClusterError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ClusterError::UnknownNode(node_id.clone()))?;
        node.max_connections = max_connections;
        Ok(())
    }

    /// Whether `node_id` is registered and accepts `space`.
    pub fn accepts(&self, node_id: &NodeId, space: SpaceId) -> bool {
        self.nodes.get(node_id).is_some_and(|n| n.accepts(space))
    }

    /// Look up a node.
    pub fn get(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Whether `node_id` is registered.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Iterate over all registered nodes.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no nodes are registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
