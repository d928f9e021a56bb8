//! Discovery listener: feeds membership changes into the balancer.
//!
//! Events are applied strictly in arrival order, one at a time. Ordering is
//! a contract with the feed; the listener does not reorder or deduplicate.

use std::sync::Arc;

use tether_types::DiscoveryEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::ClusterError;
use crate::state::{ApplySummary, Balancer};

/// Applies discovery events to a [`Balancer`].
#[derive(Debug)]
pub struct DiscoveryListener {
    balancer: Arc<Balancer>,
}

impl DiscoveryListener {
    /// Create a listener for `balancer`.
    pub fn new(balancer: Arc<Balancer>) -> Self {
        Self { balancer }
    }

    /// Run the listener loop until every sender is dropped.
    ///
    /// Returns the accumulated summary of everything applied.
    pub async fn run(&self, mut events: mpsc::Receiver<DiscoveryEvent>) -> ApplySummary {
        info!("discovery listener started");
        let mut total = ApplySummary::default();

        while let Some(event) = events.recv().await {
            let summary = self.balancer.apply(event).await;
            debug!(
                applied = summary.applied,
                dropped = summary.dropped,
                evicted = summary.evicted,
                "discovery event applied"
            );
            total.applied += summary.applied;
            total.dropped += summary.dropped;
            total.evicted += summary.evicted;
        }

        info!(
            applied = total.applied,
            dropped = total.dropped,
            evicted = total.evicted,
            "discovery listener shutting down, feed closed"
        );
        total
    }

    /// Spawn the listener on the current runtime.
    ///
    /// The returned handle is the feed; dropping it (and every clone) stops
    /// the listener.
    pub fn spawn(balancer: Arc<Balancer>, buffer: usize) -> (DiscoveryHandle, JoinHandle<ApplySummary>) {
        let (tx, rx) = mpsc::channel(buffer);
        let listener = Self::new(balancer);
        let task = tokio::spawn(async move { listener.run(rx).await });
        (DiscoveryHandle { tx }, task)
    }
}

/// Sending half of a spawned [`DiscoveryListener`].
#[derive(Debug, Clone)]
pub struct DiscoveryHandle {
    tx: mpsc::Sender<DiscoveryEvent>,
}

impl DiscoveryHandle {
    /// Queue an event. Waits if the listener is behind.
    pub async fn send(&self, event: DiscoveryEvent) -> Result<(), ClusterError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ClusterError::ServiceStopped)
    }
}
