//! Shared test harness for tether integration tests.
//!
//! Provides [`TestCluster`]: a [`Balancer`] wired to a recording notifier,
//! plus a simulated transport view of which backend instances are live.
//! Nodes are addressed by a small index `n`, mapping to `10.0.0.n:8080`.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, Mutex, PoisonError};

use tether_cluster::{Balancer, BalancerConfig, ClusterError, Outbound, ResetNotifier, Route};
use tether_types::{Instance, NodeDescriptor, NodeId, NodeMessage, SpaceId};

/// Port every test node listens on.
pub const PORT: u16 = 8080;

// =========================================================================
// Recording notifier
// =========================================================================

/// Notifier that keeps every published message in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    log: Mutex<Vec<Outbound>>,
}

impl RecordingNotifier {
    /// Remove and return everything published so far.
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.log.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ResetNotifier for RecordingNotifier {
    fn publish(&self, channel: &str, message: NodeMessage) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Outbound {
                channel: channel.to_string(),
                message,
            });
    }
}

// =========================================================================
// Node naming
// =========================================================================

/// Host of test node `n`.
pub fn host(n: u8) -> String {
    format!("10.0.0.{n}")
}

/// Identity of test node `n`.
pub fn node_id(n: u8) -> NodeId {
    NodeId::from_addr(&host(n), PORT)
}

/// Descriptor of test node `n` accepting `spaces`.
pub fn descriptor(n: u8, spaces: &[u32]) -> NodeDescriptor {
    NodeDescriptor::new(&host(n), PORT, spaces.iter().copied().map(SpaceId))
}

/// Build a set of spaces.
pub fn spaces(ids: &[u32]) -> BTreeSet<SpaceId> {
    ids.iter().copied().map(SpaceId).collect()
}

/// Reset channel name of test node `n` under the default prefix.
pub fn channel(n: u8) -> String {
    format!("reset-channel-{}", node_id(n))
}

// =========================================================================
// TestCluster
// =========================================================================

/// A balancer plus the transport layer's view of live instances.
pub struct TestCluster {
    balancer: Arc<Balancer>,
    notifier: Arc<RecordingNotifier>,
    /// Nodes the simulated transport can reach.
    live: BTreeSet<u8>,
}

impl TestCluster {
    /// Create an empty cluster with 100 virtual nodes per node.
    pub fn new() -> Self {
        Self::with_config(BalancerConfig::default())
    }

    /// Create an empty cluster with the given balancer settings.
    pub fn with_config(config: BalancerConfig) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let balancer = Balancer::new(config, notifier.clone());
        Self {
            balancer,
            notifier,
            live: BTreeSet::new(),
        }
    }

    /// The underlying balancer.
    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    /// Register node `n` and mark it live. Returns the eviction count.
    pub async fn add_node(&mut self, n: u8, spaces: &[u32]) -> Result<usize, ClusterError> {
        let evicted = self.balancer.register(descriptor(n, spaces)).await?;
        self.live.insert(n);
        Ok(evicted)
    }

    /// Unregister node `n` and mark it unreachable.
    pub async fn remove_node(&mut self, n: u8) -> bool {
        self.live.remove(&n);
        self.balancer.unregister(&node_id(n)).await
    }

    /// Replace the accepted spaces of node `n`.
    pub async fn set_spaces(&self, n: u8, ids: &[u32]) -> Result<(), ClusterError> {
        self.balancer
            .update_capability(&node_id(n), spaces(ids))
            .await
            .map(|_| ())
    }

    /// Make node `n` unreachable without telling the balancer, as if it
    /// crashed before discovery noticed.
    pub fn kill(&mut self, n: u8) {
        self.live.remove(&n);
    }

    /// The live instance list handed to every routing call.
    pub fn live(&self) -> Vec<Instance> {
        self.live
            .iter()
            .map(|n| Instance::new(host(*n), PORT))
            .collect()
    }

    /// Route a connection; `None` means no node was available.
    pub async fn route(&self, identity: &str, space: u32) -> Option<NodeId> {
        match self.balancer.route(identity, space, &self.live()).await {
            Ok(Route::Assigned(a)) => Some(a.node_id),
            Ok(Route::Unavailable) => None,
            Err(e) => panic!("routing {identity} failed: {e}"),
        }
    }

    /// Route `count` connections named `<prefix>-<i>` into `space` and
    /// return those that were placed, with their node.
    pub async fn route_many(&self, prefix: &str, space: u32, count: usize) -> Vec<(String, NodeId)> {
        let mut placed = Vec::new();
        for i in 0..count {
            let identity = format!("{prefix}-{i}");
            if let Some(node) = self.route(&identity, space).await {
                placed.push((identity, node));
            }
        }
        placed
    }

    /// Drain recorded reset notifications.
    pub fn take_resets(&self) -> Vec<Outbound> {
        self.notifier.take()
    }

    /// Ring view rebuilt from every registered node's positions.
    pub async fn ring_view(&self) -> BTreeMap<u32, NodeId> {
        let mut view = BTreeMap::new();
        for node in self.balancer.status().await.nodes {
            for pos in self.balancer.positions_of(&node.id).await {
                view.insert(pos, node.id.clone());
            }
        }
        view
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// The node owning the arc that contains `position` in `view`.
pub fn arc_owner(view: &BTreeMap<u32, NodeId>, position: u32) -> Option<NodeId> {
    view.range((Excluded(position), Unbounded))
        .next()
        .or_else(|| view.iter().next())
        .map(|(_, id)| id.clone())
}
