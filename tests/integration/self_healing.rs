//! Integration test: self-healing.
//!
//! A node crashes without a clean unregister. Routing through its ring
//! entries removes it and never selects it again.

use tether_integration_tests::{TestCluster, node_id};
use tether_types::RingEvent;

/// 3 nodes, node 2 dies silently. Routing skips it, drops its positions,
/// and the remaining ring is exactly the survivors'.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_crashed_node_is_purged_by_routing() {
    let mut c = TestCluster::new();
    let mut events = c.balancer().subscribe();
    for n in 1..=3 {
        c.add_node(n, &[1]).await.unwrap();
    }
    assert_eq!(c.balancer().ring_size().await, 300);

    c.kill(2);
    let placed = c.route_many("user", 1, 200).await;
    assert!(placed.iter().all(|(_, n)| *n != node_id(2)));

    let b = c.balancer();
    assert!(!b.contains(&node_id(2)).await);
    assert!(b.positions_of(&node_id(2)).await.is_empty());
    assert_eq!(b.ring_size().await, 200);

    let mut purged = 0;
    while let Ok(event) = events.try_recv() {
        if event == RingEvent::StaleNodeRemoved(node_id(2)) {
            purged += 1;
        }
    }
    assert_eq!(purged, 1);
}

/// Once only the dead node accepts a space, that space is unavailable and
/// stays unavailable.
#[tokio::test]
async fn test_sole_accepter_dead_means_unavailable() {
    let mut c = TestCluster::new();
    c.add_node(1, &[1]).await.unwrap();
    c.add_node(2, &[2]).await.unwrap();
    c.kill(2);

    for i in 0..20 {
        assert_eq!(c.route(&format!("u{i}"), 2).await, None);
    }
    // Space 1 keeps working.
    assert!(!c.route_many("v", 1, 20).await.is_empty());
}

/// A purged node that comes back through discovery is a fresh node.
#[tokio::test]
async fn test_purged_node_can_rejoin() {
    let mut c = TestCluster::new();
    c.add_node(1, &[1]).await.unwrap();
    c.add_node(2, &[1]).await.unwrap();
    c.kill(2);
    c.route_many("user", 1, 100).await;
    assert!(!c.balancer().contains(&node_id(2)).await);

    c.add_node(2, &[1]).await.unwrap();
    assert_eq!(c.balancer().ring_size().await, 200);
    let placed = c.route_many("late", 1, 100).await;
    assert!(placed.iter().any(|(_, n)| *n == node_id(2)));
}
