//! Integration test: basic routing scenarios.
//!
//! Two-node routing by space, capability removal with resets, the empty
//! ring, duplicate registration, determinism and the ring size invariant.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tether_cluster::ClusterError;
use tether_integration_tests::{TestCluster, arc_owner, channel, descriptor, node_id};
use tether_types::{MessageKind, SpaceId};

/// X and Y both accept space 1, Y also accepts space 2.
/// `(u1, 1)` lands on one of them, stably. `(u2, 2)` must land on Y.
#[tokio::test]
async fn test_space_routes_to_only_accepter() {
    let mut c = TestCluster::new();
    c.add_node(1, &[1]).await.unwrap();
    c.add_node(2, &[1, 2]).await.unwrap();

    let n = c.route("u1", 1).await.expect("u1 should be placed");
    assert!(n == node_id(1) || n == node_id(2));
    assert_eq!(c.route("u1", 1).await, Some(n));

    assert_eq!(c.route("u2", 2).await, Some(node_id(2)));
}

/// X accepts {1} and holds placements; X's capability becomes {}.
/// Exactly the space-1 placements in X's arcs are evicted, one reset each,
/// all on X's channel.
#[tokio::test]
async fn test_capability_removal_resets_connections() {
    let mut c = TestCluster::new();
    c.add_node(1, &[1]).await.unwrap();
    c.add_node(2, &[2]).await.unwrap();

    let placed = c.route_many("conn", 1, 60).await;
    assert!(!placed.is_empty());
    assert!(placed.iter().all(|(_, n)| *n == node_id(1)));

    let view = c.ring_view().await;
    let expected: HashSet<String> = c
        .balancer()
        .placements()
        .await
        .into_iter()
        .filter(|p| arc_owner(&view, p.position) == Some(node_id(1)))
        .map(|p| p.connection_id)
        .collect();

    c.set_spaces(1, &[]).await.unwrap();

    let resets = c.take_resets();
    assert_eq!(resets.len(), expected.len());
    let reset_ids: HashSet<String> = resets
        .iter()
        .map(|r| r.message.connection_id.clone())
        .collect();
    assert_eq!(reset_ids, expected);
    for r in &resets {
        assert_eq!(r.channel, channel(1));
        assert_eq!(r.message.kind, MessageKind::UserReset);
        assert_eq!(
            r.message.to_json().unwrap(),
            format!(
                r#"{{"type":"USER_RESET","connectionId":"{}","data":null}}"#,
                r.message.connection_id
            )
        );
    }
    for id in &expected {
        assert!(c.balancer().placement(id).await.is_none());
    }
}

/// Nothing registered: routing answers "unavailable", never errors.
#[tokio::test]
async fn test_empty_ring_routes_nowhere() {
    let c = TestCluster::new();
    for i in 0..20 {
        assert_eq!(c.route(&format!("u{i}"), i % 3).await, None);
    }
    assert_eq!(c.balancer().ring_size().await, 0);
}

/// Registering the same id twice keeps the first registration.
#[tokio::test]
async fn test_duplicate_registration_is_ignored() {
    let mut c = TestCluster::new();
    c.add_node(1, &[1]).await.unwrap();
    let err = c.add_node(1, &[2, 3]).await.unwrap_err();
    assert!(matches!(err, ClusterError::DuplicateNode(_)));

    let b = c.balancer();
    assert!(b.accepts(&node_id(1), SpaceId(1)).await);
    assert!(!b.accepts(&node_id(1), SpaceId(2)).await);
    assert_eq!(b.ring_size().await, 100);
    assert_eq!(b.node_count().await, 1);
}

/// Same ring, same capabilities: the same answer every time.
#[tokio::test]
async fn test_routing_is_deterministic() {
    let mut c = TestCluster::new();
    for n in 1..=4 {
        c.add_node(n, &[1, 2, 3]).await.unwrap();
    }
    let first = c.route_many("user", 2, 100).await;
    let second = c.route_many("user", 2, 100).await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 100);
}

/// Ring size equals 100 per live node through random joins and leaves.
#[tokio::test]
async fn test_ring_size_tracks_membership() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut c = TestCluster::new();
    let mut members: Vec<u8> = Vec::new();

    for _ in 0..60 {
        if members.is_empty() || (members.len() < 20 && rng.random_bool(0.6)) {
            let n = rng.random_range(1..=40u8);
            if members.contains(&n) {
                assert!(c.add_node(n, &[1]).await.is_err());
                continue;
            }
            c.add_node(n, &[1]).await.unwrap();
            members.push(n);
        } else {
            let n = members.swap_remove(rng.random_range(0..members.len()));
            assert!(c.remove_node(n).await);
        }

        let ring = c.balancer().ring_size().await;
        assert!(ring <= members.len() * 100);
        assert!(ring + 5 >= members.len() * 100, "ring {ring} for {} nodes", members.len());
    }
}

/// Metadata republished through discovery drives the same rebalance.
#[tokio::test]
async fn test_metadata_event_updates_capability() {
    use tether_types::DiscoveryEvent;

    let c = TestCluster::new();
    let b = c.balancer();
    let summary = b
        .apply(DiscoveryEvent::Added(vec![descriptor(1, &[1]), descriptor(2, &[1])]))
        .await;
    assert_eq!(summary.applied, 2);

    let summary = b
        .apply(DiscoveryEvent::MetadataChanged(vec![descriptor(2, &[1, 4])]))
        .await;
    assert_eq!(summary.applied, 1);
    assert!(b.accepts(&node_id(2), SpaceId(4)).await);
}
