//! The shared broker seam.
//!
//! The broker holds only hints — pending envelopes, work queues, the
//! active-node listing and ranking — never authoritative task state. The
//! trait exposes the minimal keyspace operations the core needs so that the
//! Redis client and the in-memory testkit are interchangeable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;

/// Key builders for the shared broker namespace.
pub mod keys {
    use crate::node::NodeId;
    use crate::task::TaskId;

    /// Set of node identifiers currently claiming to be alive.
    pub const ACTIVE_NODES: &str = "active_nodes";
    /// Sorted set ranking nodes by worker-advertised priority (lower first).
    pub const NODE_RANKINGS: &str = "node_rankings";
    /// Global list of pending-task envelopes.
    pub const PENDING_TASKS: &str = "pending_tasks";
    /// Global mutex around the stuck-task sweep.
    pub const RECOVER_STUCK_TASKS_LOCK: &str = "recover_stuck_tasks_lock";

    /// Hash of a single worker's advertised resources.
    pub fn worker_node(node_id: &NodeId) -> String {
        format!("worker_nodes:{node_id}")
    }

    /// Per-node work queue; dispatchers push at the head, workers pop the tail.
    pub fn task_queue(node_id: &NodeId) -> String {
        format!("task_queue:{node_id}")
    }

    /// Per-node control queue, same push/pop convention as the work queue.
    pub fn control_queue(node_id: &NodeId) -> String {
        format!("control_queue:{node_id}")
    }

    /// Serializes the fast-path state transition for one task.
    pub fn task_dispatch(task_id: &TaskId) -> String {
        format!("task_dispatch:{task_id}")
    }

    /// Serializes capacity decisions for one node.
    pub fn node_dispatch(node_id: &NodeId) -> String {
        format!("node_dispatch:{node_id}")
    }

    /// Sharded guard around node selection; shard = now_ms % shard count.
    pub fn node_selection(shard: u64) -> String {
        format!("node_selection:{shard}")
    }

    /// Guards one pending-envelope processing attempt.
    pub fn pending_task_process(task_id: &TaskId) -> String {
        format!("pending_task_process:{task_id}")
    }

    /// Guards recovery of one stuck task.
    pub fn task_recover(task_id: &TaskId) -> String {
        format!("task_recover:{task_id}")
    }
}

/// Keyspace operations against the shared broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// All members of a set.
    async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>>;

    /// Remove one member from a set.
    async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()>;

    /// Read a whole hash; an absent key reads as an empty map.
    async fn hash_get_all(&self, key: &str) -> anyhow::Result<HashMap<String, String>>;

    /// Members of a sorted set with their scores, ascending by score.
    async fn sorted_set_range(&self, key: &str) -> anyhow::Result<Vec<(String, f64)>>;

    /// Remove one member from a sorted set.
    async fn sorted_set_remove(&self, key: &str, member: &str) -> anyhow::Result<()>;

    /// Push a value onto the head of a list.
    async fn list_push_head(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Pop a value from the tail of a list, if any.
    async fn list_pop_tail(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Current length of a list.
    async fn list_len(&self, key: &str) -> anyhow::Result<u64>;

    /// Delete a key of any type.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Atomically set `key` to `value` with expiry `ttl`, only if the key is
    /// currently absent. Returns whether the write happened. This is the
    /// primitive the lock service is built on.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;
}
