//! Rebalance engine: evicts placements invalidated by a topology change.
//!
//! A change is anchored at the changed node's virtual-node positions. For
//! each anchor the placements inside the arc owned by that virtual node are
//! tested against a predicate; matches are removed from the placement ring
//! and returned so the caller can notify the node that held them.
//!
//! Node removal does not scan. Connections held by a departed node break on
//! their own and reconnect through the router.

use tether_placement::PlacementRing;
use tether_types::{NodeId, Placement};
use tracing::{debug, info};

use crate::registry::CapabilityDiff;
use crate::topology::Topology;

/// Evict the placements inside the arcs ending at `anchors` that match
/// `predicate`. Releases each evicted placement on the node that held it.
pub(crate) fn scan<F>(
    topology: &Topology,
    placements: &mut PlacementRing,
    anchors: &[u32],
    predicate: F,
) -> Vec<Placement>
where
    F: Fn(&Placement) -> bool,
{
    let mut evicted = Vec::new();
    for &anchor in anchors {
        let Some(arc) = topology.ring.arc_ending_at(anchor) else {
            // Empty ring, nothing owns anything.
            break;
        };
        let drained = placements.drain_arc(arc, &predicate);
        if !drained.is_empty() {
            debug!(anchor, ?arc, count = drained.len(), "evicting placements from arc");
        }
        evicted.extend(drained);
    }

    for placement in &evicted {
        if let Some(node) = topology.registry.get(&placement.node_id) {
            node.placement_released();
        }
    }
    evicted
}

/// Evictions after `node_id` joined: placements in its new arcs whose space
/// it accepts now belong to it.
pub(crate) fn on_join(
    topology: &Topology,
    placements: &mut PlacementRing,
    node_id: &NodeId,
) -> Vec<Placement> {
    let Some(node) = topology.registry.get(node_id) else {
        return Vec::new();
    };
    let evicted = scan(topology, placements, node.positions(), |p| node.accepts(p.space));
    info!(%node_id, evicted = evicted.len(), "rebalanced after join");
    evicted
}

/// Evictions after `node_id` changed its accepted spaces.
///
/// The removed set is scanned first, then the added set, over the same
/// anchors. A placement evicted by the first scan is gone from the ring and
/// cannot be evicted again by the second.
pub(crate) fn on_capability_change(
    topology: &Topology,
    placements: &mut PlacementRing,
    node_id: &NodeId,
    diff: &CapabilityDiff,
) -> Vec<Placement> {
    if !diff.changed() {
        return Vec::new();
    }
    let anchors = topology.positions_of(node_id);

    let mut evicted = scan(topology, placements, &anchors, |p| {
        diff.removed.contains(&p.space)
    });
    evicted.extend(scan(topology, placements, &anchors, |p| {
        diff.added.contains(&p.space)
    }));

    info!(
        %node_id,
        added = ?diff.added,
        removed = ?diff.removed,
        evicted = evicted.len(),
        "rebalanced after capability change"
    );
    evicted
}
