//! Consistent hashing ring implementation.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use tether_types::NodeId;
use tracing::debug;

use crate::hash::{ring_hash, vnode_key};

/// The range of ring positions owned by one virtual node.
///
/// Lookups move to the first position strictly greater than the key, so the
/// virtual node at `p` with predecessor `b` owns `[b, p)`. The lowest virtual
/// node owns the wrap-around range `[last, MAX] ∪ [0, p)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingArc {
    /// `[start, end)`.
    Span {
        /// Inclusive lower bound (the predecessor's position).
        start: u32,
        /// Exclusive upper bound (the owning virtual node's position).
        end: u32,
    },
    /// `[tail_start, u32::MAX] ∪ [0, head_end)`.
    Wrapped {
        /// Position of the highest virtual node on the ring.
        tail_start: u32,
        /// Position of the owning (lowest) virtual node.
        head_end: u32,
    },
}

impl RingArc {
    /// Whether `position` falls inside this arc.
    pub fn contains(&self, position: u32) -> bool {
        match *self {
            RingArc::Span { start, end } => (start..end).contains(&position),
            RingArc::Wrapped {
                tail_start,
                head_end,
            } => position >= tail_start || position < head_end,
        }
    }
}

/// Consistent hashing ring mapping positions to node identities.
///
/// Each node is mapped to `vnodes_per_node` virtual nodes. A collision
/// between two virtual nodes keeps the one inserted last.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Virtual node positions: ring position -> physical node.
    vnodes: BTreeMap<u32, NodeId>,
    /// Number of virtual nodes placed per physical node.
    vnodes_per_node: u16,
}

impl HashRing {
    /// Create an empty ring placing `vnodes_per_node` virtual nodes per node.
    pub fn new(vnodes_per_node: u16) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            vnodes_per_node,
        }
    }

    /// Number of virtual nodes placed per physical node.
    pub fn vnodes_per_node(&self) -> u16 {
        self.vnodes_per_node
    }

    /// Place the virtual nodes of `node_id` on the ring.
    ///
    /// Returns the positions in index order; the caller keeps them so the
    /// node can later be removed without rehashing.
    pub fn insert_node(&mut self, node_id: &NodeId) -> Vec<u32> {
        let mut positions = Vec::with_capacity(usize::from(self.vnodes_per_node));
        for i in 0..self.vnodes_per_node {
            let pos = ring_hash(&vnode_key(node_id, i));
            if let Some(previous) = self.vnodes.insert(pos, node_id.clone())
                && previous != *node_id
            {
                debug!(%node_id, %previous, pos, "virtual node collision, last write wins");
            }
            positions.push(pos);
        }
        debug!(%node_id, vnodes = positions.len(), "added node to ring");
        positions
    }

    /// Delete exactly the given positions. Returns how many were present.
    pub fn remove_positions(&mut self, positions: &[u32]) -> usize {
        positions
            .iter()
            .filter(|pos| self.vnodes.remove(*pos).is_some())
            .count()
    }

    /// The node owning `position` exactly, if a virtual node sits there.
    pub fn get(&self, position: u32) -> Option<&NodeId> {
        self.vnodes.get(&position)
    }

    /// First entry strictly after `position`, without wrapping.
    pub fn higher_entry(&self, position: u32) -> Option<(u32, &NodeId)> {
        self.vnodes
            .range((Excluded(position), Unbounded))
            .next()
            .map(|(pos, id)| (*pos, id))
    }

    /// Last position strictly before `position`, without wrapping.
    pub fn lower_position(&self, position: u32) -> Option<u32> {
        self.vnodes.range(..position).next_back().map(|(pos, _)| *pos)
    }

    /// Lowest entry on the ring.
    pub fn first_entry(&self) -> Option<(u32, &NodeId)> {
        self.vnodes.first_key_value().map(|(pos, id)| (*pos, id))
    }

    /// Highest position on the ring.
    pub fn last_position(&self) -> Option<u32> {
        self.vnodes.last_key_value().map(|(pos, _)| *pos)
    }

    /// All virtual node positions in ascending order.
    pub fn positions(&self) -> impl Iterator<Item = u32> {
        self.vnodes.keys().copied()
    }

    /// Entries strictly after `position` up to the end of the ring.
    pub fn entries_after(&self, position: u32) -> impl Iterator<Item = (u32, &NodeId)> {
        self.vnodes
            .range((Excluded(position), Unbounded))
            .map(|(pos, id)| (*pos, id))
    }

    /// The arc owned by the virtual node at `position`.
    ///
    /// Returns `None` when the ring is empty.
    pub fn arc_ending_at(&self, position: u32) -> Option<RingArc> {
        match self.lower_position(position) {
            Some(start) => Some(RingArc::Span {
                start,
                end: position,
            }),
            None => self.last_position().map(|tail_start| RingArc::Wrapped {
                tail_start,
                head_end: position,
            }),
        }
    }

    /// Total number of virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.vnodes.len()
    }

    /// Whether the ring has no virtual nodes.
    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }
}
