//! The balancer service object.
//!
//! [`Balancer`] owns the routing view (registry + hash ring) and the
//! placement ring, and is the only way to mutate them. It is shared as an
//! `Arc<Balancer>` between the connection-routing path and the discovery
//! path.
//!
//! Locking: the topology sits behind a `RwLock`, the placements behind a
//! `Mutex`, and the topology lock is always taken first. Routing holds the
//! topology read guard from the ring walk through recording the placement,
//! so a routing decision never sees a half-applied membership change.
//! Discovery events hold the write guard for the whole
//! register/insert/scan/evict sequence. Notifications and ring events go out
//! after both locks are released.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tether_placement::PlacementRing;
use tether_types::{
    DEFAULT_RESET_CHANNEL_PREFIX, DEFAULT_VNODES_PER_NODE, DiscoveryEvent, Instance,
    NodeDescriptor, NodeId, NodeMessage, Placement, RingEvent, SpaceId, reset_channel,
};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, error, info, warn};

use crate::error::ClusterError;
use crate::notify::ResetNotifier;
use crate::rebalance;
use crate::registry::CapabilityDiff;
use crate::router::{self, Assignment, Route, RouteRequest, StaleNode};
use crate::topology::Topology;

/// Balancer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerConfig {
    /// Virtual nodes placed per physical node.
    pub vnodes_per_node: u16,
    /// Prefix of the per-node reset channel.
    pub channel_prefix: String,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            vnodes_per_node: DEFAULT_VNODES_PER_NODE,
            channel_prefix: DEFAULT_RESET_CHANNEL_PREFIX.to_string(),
        }
    }
}

/// Outcome of applying one discovery event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    /// Entries that changed the topology.
    pub applied: usize,
    /// Entries logged and dropped (duplicate add, unknown node).
    pub dropped: usize,
    /// Placements evicted across the whole event.
    pub evicted: usize,
}

/// Point-in-time view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    /// Node identity.
    pub id: NodeId,
    /// Connectable address.
    pub address: String,
    /// Accepted spaces.
    pub spaces: BTreeSet<SpaceId>,
    /// Live placements assigned to the node.
    pub placements: usize,
    /// Advertised connection cap.
    pub max_connections: Option<u32>,
    /// Virtual nodes the node placed on the ring.
    pub vnodes: usize,
}

/// Point-in-time view of the whole balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterStatus {
    /// Virtual nodes currently on the ring.
    pub ring_size: usize,
    /// Configured virtual nodes per node.
    pub vnodes_per_node: u16,
    /// Live placements.
    pub placements: usize,
    /// Registered nodes, ordered by id.
    pub nodes: Vec<NodeStatus>,
}

/// Connection balancer over a consistent hashing ring.
pub struct Balancer {
    config: BalancerConfig,
    topology: RwLock<Topology>,
    placements: Mutex<PlacementRing>,
    notifier: Arc<dyn ResetNotifier>,
    /// Broadcast channel for ring events.
    event_tx: broadcast::Sender<RingEvent>,
}

impl Balancer {
    /// Create a balancer with an empty ring.
    pub fn new(config: BalancerConfig, notifier: Arc<dyn ResetNotifier>) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            topology: RwLock::new(Topology::new(config.vnodes_per_node)),
            placements: Mutex::new(PlacementRing::new()),
            config,
            notifier,
            event_tx,
        })
    }

    /// The configuration this balancer was built with.
    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Subscribe to ring events.
    pub fn subscribe(&self) -> broadcast::Receiver<RingEvent> {
        self.event_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Discovery path
    // -----------------------------------------------------------------------

    /// Register a node, place its virtual nodes and evict the placements
    /// that now belong to it.
    ///
    /// Returns the number of evicted placements. A duplicate id fails with
    /// [`ClusterError::DuplicateNode`] and changes nothing.
    pub async fn register(&self, descriptor: NodeDescriptor) -> Result<usize, ClusterError> {
        let node_id = descriptor.id.clone();
        let evicted = {
            let mut topology = self.topology.write().await;
            let mut placements = self.placements.lock().await;
            topology.add_node(descriptor)?;
            rebalance::on_join(&topology, &mut placements, &node_id)
        };

        self.emit(RingEvent::NodeJoined(node_id.clone()));
        Ok(self.finish_rebalance(&node_id, evicted))
    }

    /// Unregister a node and take its virtual nodes off the ring.
    ///
    /// Placements held by the node are left in place; the connections break
    /// on their own and are routed again. Returns `false` if the node was
    /// not registered.
    pub async fn unregister(&self, node_id: &NodeId) -> bool {
        let removed = self.topology.write().await.remove_node(node_id).is_some();
        if removed {
            self.emit(RingEvent::NodeLeft(node_id.clone()));
        }
        removed
    }

    /// Replace a node's accepted spaces and evict the placements the change
    /// invalidates.
    pub async fn update_capability(
        &self,
        node_id: &NodeId,
        spaces: BTreeSet<SpaceId>,
    ) -> Result<CapabilityDiff, ClusterError> {
        let (diff, _) = self.change_capability(node_id, spaces, None).await?;
        Ok(diff)
    }

    /// Apply republished metadata: refresh the connection cap and replace
    /// the accepted spaces.
    pub async fn update_node(&self, descriptor: NodeDescriptor) -> Result<CapabilityDiff, ClusterError> {
        let (diff, _) = self
            .change_capability(&descriptor.id, descriptor.spaces, Some(descriptor.max_connections))
            .await?;
        Ok(diff)
    }

    async fn change_capability(
        &self,
        node_id: &NodeId,
        spaces: BTreeSet<SpaceId>,
        max_connections: Option<Option<u32>>,
    ) -> Result<(CapabilityDiff, usize), ClusterError> {
        let (diff, evicted) = {
            let mut topology = self.topology.write().await;
            let mut placements = self.placements.lock().await;
            if let Some(max_connections) = max_connections {
                topology.registry.set_max_connections(node_id, max_connections)?;
            }
            let diff = topology.update_capability(node_id, spaces)?;
            let evicted =
                rebalance::on_capability_change(&topology, &mut placements, node_id, &diff);
            (diff, evicted)
        };

        if diff.changed() {
            self.emit(RingEvent::CapabilityChanged {
                node_id: node_id.clone(),
                added: diff.added.clone(),
                removed: diff.removed.clone(),
            });
        } else {
            debug!(%node_id, "capability unchanged");
        }
        let evicted = self.finish_rebalance(node_id, evicted);
        Ok((diff, evicted))
    }

    /// Apply one discovery event.
    ///
    /// Entries are applied in order, each in its own exclusive section.
    /// Duplicate adds and references to unknown nodes are logged and
    /// dropped.
    pub async fn apply(&self, event: DiscoveryEvent) -> ApplySummary {
        let mut summary = ApplySummary::default();
        match event {
            DiscoveryEvent::Added(nodes) => {
                for descriptor in nodes {
                    match self.register(descriptor).await {
                        Ok(evicted) => {
                            summary.applied += 1;
                            summary.evicted += evicted;
                        }
                        Err(e) => {
                            error!(error = %e, "dropping add event");
                            summary.dropped += 1;
                        }
                    }
                }
            }
            DiscoveryEvent::Removed(ids) => {
                for node_id in ids {
                    if self.unregister(&node_id).await {
                        summary.applied += 1;
                    } else {
                        warn!(%node_id, "dropping remove event for unknown node");
                        summary.dropped += 1;
                    }
                }
            }
            DiscoveryEvent::MetadataChanged(nodes) => {
                for descriptor in nodes {
                    let node_id = descriptor.id.clone();
                    let max_connections = Some(descriptor.max_connections);
                    match self
                        .change_capability(&node_id, descriptor.spaces, max_connections)
                        .await
                    {
                        Ok((_, evicted)) => {
                            summary.applied += 1;
                            summary.evicted += evicted;
                        }
                        Err(e) => {
                            warn!(%node_id, error = %e, "dropping metadata event");
                            summary.dropped += 1;
                        }
                    }
                }
            }
        }
        summary
    }

    // -----------------------------------------------------------------------
    // Routing path
    // -----------------------------------------------------------------------

    /// Route a connection to a live node accepting `space`.
    ///
    /// `instances` is the transport layer's current list of connectable
    /// backends. A node the walk would pick but that is missing from the
    /// list is skipped and then removed from the ring.
    ///
    /// An empty ring, an empty instance list, or a ring with no live
    /// accepting node yields [`Route::Unavailable`]. An empty instance list
    /// never marks nodes stale. Only an empty identity is an error.
    pub async fn route(
        &self,
        identity: &str,
        space: impl Into<SpaceId>,
        instances: &[Instance],
    ) -> Result<Route, ClusterError> {
        let request = RouteRequest::new(identity, space)?;
        if instances.is_empty() {
            debug!(connection_id = %request.identity, "no live instances, not routing");
            return Ok(Route::Unavailable);
        }
        let position = request.position();
        let live: HashMap<NodeId, &Instance> = instances.iter().map(|i| (i.node_id(), i)).collect();

        let (route, stale) = {
            let topology = self.topology.read().await;
            let selection = router::select(&topology, position, request.space, |id| {
                live.contains_key(id)
            });

            let route = match selection.chosen.and_then(|id| live.get(&id).map(|i| (id, *i))) {
                Some((node_id, instance)) => {
                    let mut placements = self.placements.lock().await;
                    let previous = placements.insert(Placement {
                        position,
                        connection_id: request.identity.clone(),
                        space: request.space,
                        node_id: node_id.clone(),
                    });
                    if let Some(previous) = previous
                        && let Some(node) = topology.registry.get(&previous.node_id)
                    {
                        node.placement_released();
                    }
                    if let Some(node) = topology.registry.get(&node_id) {
                        node.placement_added();
                    }
                    debug!(connection_id = %request.identity, %node_id, position, "connection placed");
                    Route::Assigned(Assignment {
                        node_id,
                        instance: instance.clone(),
                        position,
                    })
                }
                None => Route::Unavailable,
            };
            (route, selection.stale)
        };

        if !stale.is_empty() {
            self.remove_stale(stale).await;
        }
        Ok(route)
    }

    /// Drop the placement of a disconnected connection.
    pub async fn disconnect(&self, connection_id: &str) -> Option<Placement> {
        let topology = self.topology.read().await;
        let removed = self.placements.lock().await.remove_connection(connection_id);
        match &removed {
            Some(placement) => {
                if let Some(node) = topology.registry.get(&placement.node_id) {
                    node.placement_released();
                }
                debug!(%connection_id, node_id = %placement.node_id, "connection released");
            }
            None => debug!(%connection_id, "no placement to release"),
        }
        removed
    }

    async fn remove_stale(&self, stale: Vec<StaleNode>) {
        let mut removed = Vec::with_capacity(stale.len());
        {
            let mut topology = self.topology.write().await;
            for StaleNode { node_id, generation } in stale {
                if topology.remove_registration(&node_id, generation).is_some() {
                    warn!(%node_id, "removed stale node from ring");
                    removed.push(node_id);
                } else {
                    debug!(%node_id, "stale node already gone or re-registered");
                }
            }
        }
        for node_id in removed {
            self.emit(RingEvent::StaleNodeRemoved(node_id));
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whether `node_id` is registered and accepts `space`.
    pub async fn accepts(&self, node_id: &NodeId, space: SpaceId) -> bool {
        self.topology.read().await.registry.accepts(node_id, space)
    }

    /// Whether `node_id` is registered.
    pub async fn contains(&self, node_id: &NodeId) -> bool {
        self.topology.read().await.registry.contains(node_id)
    }

    /// Ring positions of a registered node's virtual nodes.
    pub async fn positions_of(&self, node_id: &NodeId) -> Vec<u32> {
        self.topology.read().await.positions_of(node_id)
    }

    /// Live placements assigned to `node_id`, or `None` if unregistered.
    pub async fn node_placements(&self, node_id: &NodeId) -> Option<usize> {
        self.topology
            .read()
            .await
            .registry
            .get(node_id)
            .map(|n| n.placements())
    }

    /// The placement of `connection_id`, if any.
    pub async fn placement(&self, connection_id: &str) -> Option<Placement> {
        self.placements.lock().await.get(connection_id).cloned()
    }

    /// Snapshot of all live placements in ring order.
    pub async fn placements(&self) -> Vec<Placement> {
        self.placements.lock().await.iter().cloned().collect()
    }

    /// Number of live placements.
    pub async fn placement_count(&self) -> usize {
        self.placements.lock().await.len()
    }

    /// Number of virtual nodes on the ring.
    pub async fn ring_size(&self) -> usize {
        self.topology.read().await.ring.len()
    }

    /// Number of registered nodes.
    pub async fn node_count(&self) -> usize {
        self.topology.read().await.registry.len()
    }

    /// Point-in-time status of the ring, nodes and placements.
    pub async fn status(&self) -> ClusterStatus {
        let topology = self.topology.read().await;
        let placements = self.placements.lock().await.len();

        let mut nodes: Vec<NodeStatus> = topology
            .registry
            .iter()
            .map(|n| NodeStatus {
                id: n.id().clone(),
                address: n.address().to_string(),
                spaces: n.spaces().clone(),
                placements: n.placements(),
                max_connections: n.max_connections(),
                vnodes: n.positions().len(),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        ClusterStatus {
            ring_size: topology.ring.len(),
            vnodes_per_node: topology.ring.vnodes_per_node(),
            placements,
            nodes,
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Notify the previous holders of `evicted` and report the rebalance.
    fn finish_rebalance(&self, node_id: &NodeId, evicted: Vec<Placement>) -> usize {
        let count = evicted.len();
        for placement in evicted {
            let channel = reset_channel(&self.config.channel_prefix, &placement.node_id);
            info!(
                connection_id = %placement.connection_id,
                previous = %placement.node_id,
                space = %placement.space,
                "evicting placement"
            );
            self.notifier
                .publish(&channel, NodeMessage::user_reset(placement.connection_id));
        }
        if count > 0 {
            self.emit(RingEvent::Rebalanced {
                node_id: node_id.clone(),
                evicted: count,
            });
        }
        count
    }

    fn emit(&self, event: RingEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

impl std::fmt::Debug for Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
