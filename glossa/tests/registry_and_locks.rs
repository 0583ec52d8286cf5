//! Node registry cleanup, heartbeat reconciliation and lock semantics.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use glossa::broker::keys;
use glossa::node::{NodeId, NodeStatus};
use glossa::task::now_local;

#[tokio::test]
async fn listing_evicts_stale_and_orphaned_entries() {
    let h = common::harness();

    h.broker.register_node(&common::online_node("fresh"), 1.0);

    let mut stale = common::online_node("stale");
    stale.last_heartbeat = Some(now_local() - chrono::Duration::minutes(10));
    h.broker.register_node(&stale, 2.0);

    // Ranking entry for a node that never joined the active set.
    h.broker.zadd(keys::NODE_RANKINGS, "ghost", 0.5);

    let available = h.registry.list_available().await;
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].node_id, NodeId::from("fresh"));

    assert!(h.broker.set_contains(keys::ACTIVE_NODES, "fresh"));
    assert!(!h.broker.set_contains(keys::ACTIVE_NODES, "stale"));
    let (_, ranked) = h.broker.registry_snapshot();
    assert_eq!(ranked, vec!["fresh".to_string()]);
}

#[tokio::test]
async fn list_all_ignores_status_and_freshness() {
    let h = common::harness();

    h.broker.register_node(&common::online_node("fresh"), 1.0);

    let mut busy = common::online_node("busy");
    busy.status = NodeStatus::Busy;
    busy.last_heartbeat = Some(now_local() - chrono::Duration::minutes(20));
    h.broker.register_node(&busy, 2.0);

    let mut all = h.registry.list_all().await;
    all.sort_by(|a, b| a.node_id.as_str().cmp(b.node_id.as_str()));
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].node_id, NodeId::from("busy"));
    assert_eq!(all[1].node_id, NodeId::from("fresh"));
}

#[tokio::test]
async fn offline_and_busy_nodes_are_not_dispatch_targets() {
    let h = common::harness();

    let mut busy = common::online_node("busy");
    busy.status = NodeStatus::Busy;
    h.broker.register_node(&busy, 1.0);

    let mut offline = common::online_node("offline");
    offline.status = NodeStatus::Offline;
    h.broker.register_node(&offline, 2.0);

    assert!(h.registry.select_optimal().await.is_none());
}

#[tokio::test]
async fn is_healthy_requires_membership_status_and_freshness() {
    let h = common::harness();
    let node = common::online_node("n1");
    h.broker.register_node(&node, 1.0);

    assert!(h.registry.is_healthy(&node.node_id).await);
    assert!(!h.registry.is_healthy(&NodeId::from("unknown")).await);

    let mut tired = common::online_node("n2");
    tired.last_heartbeat = Some(now_local() - chrono::Duration::minutes(6));
    h.broker.register_node(&tired, 2.0);
    assert!(!h.registry.is_healthy(&tired.node_id).await);
}

#[tokio::test]
async fn reconciler_removes_dead_nodes_and_is_idempotent() {
    let h = common::harness();

    h.broker.register_node(&common::online_node("alive"), 1.0);

    let mut gone = common::online_node("gone");
    gone.status = NodeStatus::Offline;
    h.broker.register_node(&gone, 2.0);

    // Advertised as active but the hash already expired.
    h.broker.sadd(keys::ACTIVE_NODES, "vanished");

    // A worker draining out: SHUTTING_DOWN reads back as OFFLINE.
    let mut draining_hash: HashMap<String, String> = common::online_node("draining").to_hash();
    draining_hash.insert("status".to_string(), "SHUTTING_DOWN".to_string());
    h.broker
        .hset_all(&keys::worker_node(&NodeId::from("draining")), draining_hash);
    h.broker.sadd(keys::ACTIVE_NODES, "draining");

    h.reconciler.reconcile_once().await.unwrap();
    let first = h.broker.registry_snapshot();
    assert_eq!(first.0, vec!["alive".to_string()]);

    h.reconciler.reconcile_once().await.unwrap();
    let second = h.broker.registry_snapshot();
    assert_eq!(first, second);
}

#[tokio::test]
async fn crashed_lock_holder_cannot_block_forever() {
    let h = common::harness();
    let ttl = Duration::from_millis(100);

    // First holder takes the lock and "crashes" without unlocking.
    assert!(h.locks.try_lock("door", ttl, Duration::ZERO).await.unwrap());
    assert!(!h.locks.try_lock("door", ttl, Duration::ZERO).await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h.locks.try_lock("door", ttl, Duration::ZERO).await.unwrap());
}

#[tokio::test]
async fn scoped_lock_skips_when_contended_and_releases_afterwards() {
    let h = common::harness();
    let ttl = Duration::from_secs(10);

    assert!(h.locks.try_lock("door", ttl, Duration::ZERO).await.unwrap());
    let skipped = h
        .locks
        .with_lock("door", ttl, Duration::ZERO, || async { Ok(42) })
        .await
        .unwrap();
    assert!(skipped.is_none());

    h.locks.unlock("door").await;
    let ran = h
        .locks
        .with_lock("door", ttl, Duration::ZERO, || async { Ok(42) })
        .await
        .unwrap();
    assert_eq!(ran, Some(42));

    // Released on exit: immediately acquirable again.
    assert!(h.locks.try_lock("door", ttl, Duration::ZERO).await.unwrap());
}

#[tokio::test]
async fn scoped_lock_releases_on_error_paths_too() {
    let h = common::harness();
    let ttl = Duration::from_secs(10);

    let result: anyhow::Result<Option<()>> = h
        .locks
        .with_lock("door", ttl, Duration::ZERO, || async {
            anyhow::bail!("operation blew up")
        })
        .await;
    assert!(result.is_err());

    assert!(h.locks.try_lock("door", ttl, Duration::ZERO).await.unwrap());
}

#[tokio::test]
async fn contended_lock_acquires_once_the_holder_releases() {
    let h = common::harness();
    let ttl = Duration::from_secs(10);

    assert!(h.locks.try_lock("door", ttl, Duration::ZERO).await.unwrap());

    let locks = h.locks.clone();
    let waiter = tokio::spawn(async move {
        locks
            .try_lock("door", ttl, Duration::from_secs(2))
            .await
            .unwrap()
    });

    tokio::time::sleep(Duration::from_millis(80)).await;
    h.locks.unlock("door").await;

    assert!(waiter.await.unwrap());
}
