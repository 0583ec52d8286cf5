//! Ranked view of live worker nodes.
//!
//! Workers advertise themselves in the broker (hash + active set + ranking);
//! the registry turns that view into dispatch candidates, re-grounds their
//! load counts in the task repository, and opportunistically evicts entries
//! that stopped being live. Broker failures degrade to "no nodes" so callers
//! treat them as backpressure, not errors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::broker::{keys, Broker};
use crate::config::DispatchConfig;
use crate::lock::LockService;
use crate::node::{NodeId, NodeStatus, WorkerNode};
use crate::store::TaskStore;
use crate::task::now_local;

/// TTL on one sharded selection critical section.
const SELECTION_LOCK_TTL: Duration = Duration::from_secs(3);
/// How long a selector waits for its shard before giving up.
const SELECTION_LOCK_WAIT: Duration = Duration::from_secs(1);

pub struct NodeRegistry<B, S> {
    broker: Arc<B>,
    store: Arc<S>,
    locks: Arc<LockService<B>>,
    config: DispatchConfig,
}

impl<B: Broker, S: TaskStore> NodeRegistry<B, S> {
    pub fn new(
        broker: Arc<B>,
        store: Arc<S>,
        locks: Arc<LockService<B>>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            broker,
            store,
            locks,
            config,
        }
    }

    /// Every node currently advertised, regardless of status.
    pub async fn list_all(&self) -> Vec<WorkerNode> {
        match self.try_list_all().await {
            Ok(nodes) => nodes,
            Err(err) => {
                error!("failed to list nodes from broker: {err:#}");
                Vec::new()
            }
        }
    }

    async fn try_list_all(&self) -> anyhow::Result<Vec<WorkerNode>> {
        let members = self.broker.set_members(keys::ACTIVE_NODES).await?;
        let mut nodes = Vec::with_capacity(members.len());
        for member in members {
            let node_id = NodeId::from(member);
            let hash = self.broker.hash_get_all(&keys::worker_node(&node_id)).await?;
            if let Some(node) = WorkerNode::from_hash(node_id.as_str(), &hash) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// Eligible nodes only: ONLINE, member of the active set, heartbeat
    /// within the liveness window.
    ///
    /// Cleans up as it goes: ranking entries for nodes that left the active
    /// set, and active-set entries that are no longer healthy, are fully
    /// evicted.
    pub async fn list_available(&self) -> Vec<WorkerNode> {
        match self.try_list_available().await {
            Ok(nodes) => nodes,
            Err(err) => {
                error!("failed to list available nodes: {err:#}");
                Vec::new()
            }
        }
    }

    async fn try_list_available(&self) -> anyhow::Result<Vec<WorkerNode>> {
        let active: HashSet<String> = self
            .broker
            .set_members(keys::ACTIVE_NODES)
            .await?
            .into_iter()
            .collect();

        // Ranking entries with no active-set membership are leftovers from
        // nodes that went away without unregistering.
        let ranked = self.broker.sorted_set_range(keys::NODE_RANKINGS).await?;
        for (member, _) in &ranked {
            if !active.contains(member) {
                self.remove_completely(&NodeId::from(member.as_str())).await;
            }
        }

        let now = now_local();
        let window = self.config.liveness_window();
        let mut nodes = Vec::new();
        for member in &active {
            let node_id = NodeId::from(member.as_str());
            let hash = self.broker.hash_get_all(&keys::worker_node(&node_id)).await?;
            match WorkerNode::from_hash(node_id.as_str(), &hash) {
                Some(node)
                    if node.status == NodeStatus::Online && node.heartbeat_within(window, now) =>
                {
                    nodes.push(node);
                }
                Some(node) => {
                    debug!(
                        node_id = %node.node_id,
                        status = %node.status,
                        "evicting non-eligible node"
                    );
                    self.remove_completely(&node.node_id).await;
                }
                None => {
                    self.remove_completely(&node_id).await;
                }
            }
        }
        Ok(nodes)
    }

    /// ONLINE + active-set member + heartbeat within the liveness window.
    pub async fn is_healthy(&self, node_id: &NodeId) -> bool {
        match self.check_health(node_id).await {
            Ok(healthy) => healthy,
            Err(err) => {
                warn!(node_id = %node_id, "health check failed: {err:#}");
                false
            }
        }
    }

    async fn check_health(&self, node_id: &NodeId) -> anyhow::Result<bool> {
        let members = self.broker.set_members(keys::ACTIVE_NODES).await?;
        if !members.iter().any(|member| member == node_id.as_str()) {
            return Ok(false);
        }
        let hash = self.broker.hash_get_all(&keys::worker_node(node_id)).await?;
        let Some(node) = WorkerNode::from_hash(node_id.as_str(), &hash) else {
            return Ok(false);
        };
        Ok(node.status == NodeStatus::Online
            && node.heartbeat_within(self.config.liveness_window(), now_local()))
    }

    /// Pick the best eligible node for a dispatch, or nothing.
    ///
    /// Selection runs under a time-sharded lock so at most a handful of
    /// concurrent selections proceed across the fleet, without funnelling
    /// every dispatcher through one key. Each candidate's task count is
    /// re-fetched from the repository before scoring; nodes at capacity are
    /// filtered out. Ties on the load score fall back to the
    /// worker-advertised ranking, then to the node id.
    pub async fn select_optimal(&self) -> Option<WorkerNode> {
        let shard = (Local::now().timestamp_millis() as u64) % self.config.selection_shards.max(1);
        let key = keys::node_selection(shard);

        let outcome = self
            .locks
            .with_lock(&key, SELECTION_LOCK_TTL, SELECTION_LOCK_WAIT, || async {
                self.pick_candidate().await
            })
            .await;

        match outcome {
            Ok(Some(selected)) => selected,
            Ok(None) => {
                debug!(shard, "selection shard busy, yielding");
                None
            }
            Err(err) => {
                error!("node selection failed: {err:#}");
                None
            }
        }
    }

    async fn pick_candidate(&self) -> anyhow::Result<Option<WorkerNode>> {
        let candidates = self.try_list_available().await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let rankings: HashMap<String, f64> = self
            .broker
            .sorted_set_range(keys::NODE_RANKINGS)
            .await?
            .into_iter()
            .collect();

        let mut best: Option<(WorkerNode, f64, f64)> = None;
        for mut node in candidates {
            // The node's self-reported count lags; the repository decides.
            let live = self.store.count_processing(&node.node_id).await?;
            if live >= self.config.per_node_capacity {
                debug!(node_id = %node.node_id, live, "node at capacity, skipping");
                continue;
            }
            node.active_task_count = live as u32;

            let score = node.dispatch_score();
            let rank = rankings
                .get(node.node_id.as_str())
                .copied()
                .unwrap_or(f64::INFINITY);

            let better = match &best {
                None => true,
                Some((current, best_score, best_rank)) => {
                    score < *best_score
                        || (score == *best_score && rank < *best_rank)
                        || (score == *best_score
                            && rank == *best_rank
                            && node.node_id.as_str() < current.node_id.as_str())
                }
            };
            if better {
                best = Some((node, score, rank));
            }
        }

        if let Some((node, score, _)) = &best {
            info!(node_id = %node.node_id, score = *score, "selected dispatch target");
        }
        Ok(best.map(|(node, _, _)| node))
    }

    /// Evict a node from the ranking only; its registration stays.
    pub async fn remove_from_ranking(&self, node_id: &NodeId) {
        if let Err(err) = self
            .broker
            .sorted_set_remove(keys::NODE_RANKINGS, node_id.as_str())
            .await
        {
            warn!(node_id = %node_id, "failed to remove node from ranking: {err:#}");
        }
    }

    /// Evict a node from the active set, the ranking, and drop its hash.
    pub async fn remove_completely(&self, node_id: &NodeId) {
        info!(node_id = %node_id, "removing node from registry");
        if let Err(err) = self.try_remove_completely(node_id).await {
            warn!(node_id = %node_id, "failed to remove node: {err:#}");
        }
    }

    async fn try_remove_completely(&self, node_id: &NodeId) -> anyhow::Result<()> {
        self.broker
            .set_remove(keys::ACTIVE_NODES, node_id.as_str())
            .await?;
        self.broker
            .sorted_set_remove(keys::NODE_RANKINGS, node_id.as_str())
            .await?;
        self.broker.delete(&keys::worker_node(node_id)).await?;
        Ok(())
    }
}
