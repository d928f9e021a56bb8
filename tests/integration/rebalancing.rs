//! Integration test: rebalancing.
//!
//! Grow and reshape a cluster under load and check which connections get
//! reset, where the resets are addressed, and where the connections land
//! when they come back.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tether_integration_tests::{TestCluster, arc_owner, channel, node_id};
use tether_types::RingEvent;

/// 1 node with 300 connections, then 3 more join one by one.
/// Each join resets only connections now owned by the newcomer, and every
/// reset connection reroutes to the newcomer.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_joins_move_connections_to_newcomer() {
    let mut c = TestCluster::new();
    c.add_node(1, &[1]).await.unwrap();
    let placed = c.route_many("user", 1, 300).await;
    assert_eq!(placed.len(), 300);

    for n in 2..=4 {
        let before = c.balancer().placement_count().await;
        let evicted = c.add_node(n, &[1]).await.unwrap();
        let resets = c.take_resets();
        assert_eq!(resets.len(), evicted);
        assert_eq!(c.balancer().placement_count().await, before - evicted);
        assert!(evicted > 0, "node {n} took over nothing");

        let prior: HashSet<String> = (1..n).map(channel).collect();
        for reset in &resets {
            assert!(prior.contains(&reset.channel), "reset sent to {}", reset.channel);
            let back = c.route(&reset.message.connection_id, 1).await;
            assert_eq!(back, Some(node_id(n)));
        }
    }

    // Every placement sits on the node owning its arc.
    let view = c.ring_view().await;
    for p in c.balancer().placements().await {
        assert_eq!(arc_owner(&view, p.position), Some(p.node_id.clone()));
    }
}

/// A newcomer that does not accept a space leaves that space's
/// connections alone.
#[tokio::test]
async fn test_join_spares_foreign_spaces() {
    let mut c = TestCluster::new();
    c.add_node(1, &[1, 2]).await.unwrap();
    c.route_many("a", 1, 100).await;
    c.route_many("b", 2, 100).await;

    c.add_node(2, &[2]).await.unwrap();
    for reset in c.take_resets() {
        let p = reset.message.connection_id;
        assert!(p.starts_with("b-"), "space-1 connection {p} was reset");
    }
    assert_eq!(c.balancer().node_placements(&node_id(2)).await, Some(0));
}

/// Gaining a space pulls that space's connections out of the node's arcs.
#[tokio::test]
async fn test_capability_gain_evicts_to_gainer() {
    let mut c = TestCluster::new();
    c.add_node(1, &[1]).await.unwrap();
    c.add_node(2, &[]).await.unwrap();
    let placed = c.route_many("user", 1, 200).await;
    assert!(!placed.is_empty());

    let view = c.ring_view().await;
    let in_arcs: HashSet<String> = c
        .balancer()
        .placements()
        .await
        .into_iter()
        .filter(|p| arc_owner(&view, p.position) == Some(node_id(2)))
        .map(|p| p.connection_id)
        .collect();

    c.set_spaces(2, &[1]).await.unwrap();
    let resets = c.take_resets();
    let reset_ids: HashSet<String> = resets
        .iter()
        .map(|r| r.message.connection_id.clone())
        .collect();
    assert_eq!(reset_ids, in_arcs);
    assert!(resets.iter().all(|r| r.channel == channel(1)));

    for id in &reset_ids {
        assert_eq!(c.route(id, 1).await, Some(node_id(2)));
    }
}

/// Random capability churn: no connection is reset twice by one change,
/// and counters always match the placements.
#[tokio::test]
#[ntest::timeout(30000)]
async fn test_capability_churn_resets_each_connection_once() {
    let mut rng = StdRng::seed_from_u64(9);
    let mut c = TestCluster::new();
    for n in 1..=4 {
        c.add_node(n, &[1, 2, 3]).await.unwrap();
    }

    for round in 0..20 {
        for space in 1..=3 {
            c.route_many(&format!("r{round}-s{space}"), space, 30).await;
        }

        let n = rng.random_range(1..=4u8);
        let new_spaces: Vec<u32> = (1..=3).filter(|_| rng.random_bool(0.5)).collect();
        c.set_spaces(n, &new_spaces).await.unwrap();

        let resets = c.take_resets();
        let unique: HashSet<&str> = resets
            .iter()
            .map(|r| r.message.connection_id.as_str())
            .collect();
        assert_eq!(unique.len(), resets.len(), "round {round}: duplicate reset");

        let status = c.balancer().status().await;
        let counted: usize = status.nodes.iter().map(|n| n.placements).sum();
        assert_eq!(counted, status.placements, "round {round}: counters drifted");
    }
}

/// Removal does not scan: placements stay until the connections go away.
#[tokio::test]
async fn test_removal_resets_nothing() {
    let mut c = TestCluster::new();
    let mut events = c.balancer().subscribe();
    c.add_node(1, &[1]).await.unwrap();
    c.add_node(2, &[1]).await.unwrap();
    c.route_many("user", 1, 50).await;

    assert!(c.remove_node(1).await);
    assert!(c.take_resets().is_empty());
    assert_eq!(c.balancer().placement_count().await, 50);

    let mut left = false;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, RingEvent::Rebalanced { .. }));
        left |= event == RingEvent::NodeLeft(node_id(1));
    }
    assert!(left);

    // A rejoin under the same address starts from scratch.
    c.add_node(1, &[1]).await.unwrap();
    assert_eq!(c.balancer().node_placements(&node_id(1)).await, Some(0));
}
