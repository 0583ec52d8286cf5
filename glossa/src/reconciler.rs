//! Heartbeat-driven registry pruning.
//!
//! Workers keep their own hash and active-set membership fresh; this sweeper
//! removes whatever stopped doing so. It is purely reactive and never
//! touches tasks — orphaned work is the reclaimer's job.

use std::sync::Arc;

use tracing::{debug, info};

use crate::broker::{keys, Broker};
use crate::config::DispatchConfig;
use crate::node::{NodeId, NodeStatus};
use crate::registry::NodeRegistry;
use crate::runtime::{spawn_fixed_delay, ShutdownToken};
use crate::store::TaskStore;

pub struct HeartbeatReconciler<B, S> {
    broker: Arc<B>,
    registry: Arc<NodeRegistry<B, S>>,
    config: DispatchConfig,
}

impl<B, S> HeartbeatReconciler<B, S>
where
    B: Broker + 'static,
    S: TaskStore + 'static,
{
    pub fn new(broker: Arc<B>, registry: Arc<NodeRegistry<B, S>>, config: DispatchConfig) -> Self {
        Self {
            broker,
            registry,
            config,
        }
    }

    /// One reconcile pass over the active-node set.
    ///
    /// A node whose hash is missing or empty has aged out; a node reading
    /// OFFLINE (which includes SHUTTING_DOWN and unrecognized statuses) has
    /// said goodbye. Both are fully evicted. Running this any number of
    /// times against an unchanged broker yields the same registry.
    pub async fn reconcile_once(&self) -> anyhow::Result<()> {
        let members = self.broker.set_members(keys::ACTIVE_NODES).await?;
        debug!(count = members.len(), "reconciling active nodes");

        for member in members {
            let node_id = NodeId::from(member);
            let hash = self.broker.hash_get_all(&keys::worker_node(&node_id)).await?;
            if hash.is_empty() {
                info!(node_id = %node_id, "node hash expired, removing");
                self.registry.remove_completely(&node_id).await;
                continue;
            }

            let status = hash
                .get("status")
                .map(|raw| NodeStatus::parse(raw))
                .unwrap_or(NodeStatus::Offline);
            if status == NodeStatus::Offline {
                info!(node_id = %node_id, "node went offline, removing");
                self.registry.remove_completely(&node_id).await;
            }
        }
        Ok(())
    }

    /// Spawn the periodic reconcile sweep.
    pub fn spawn(self: &Arc<Self>, shutdown: &ShutdownToken) -> tokio::task::JoinHandle<()> {
        let reconciler = Arc::clone(self);
        let interval = self.config.reconcile_interval();
        spawn_fixed_delay(
            "heartbeat_reconciler",
            interval,
            interval,
            shutdown.clone(),
            move || {
                let reconciler = Arc::clone(&reconciler);
                async move { reconciler.reconcile_once().await }
            },
        )
    }
}
