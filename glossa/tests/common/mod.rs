#![allow(dead_code)]

use std::sync::Arc;

use glossa::config::DispatchConfig;
use glossa::dispatcher::Dispatcher;
use glossa::lock::LockService;
use glossa::node::{NodeId, NodeStatus, WorkerNode};
use glossa::reconciler::HeartbeatReconciler;
use glossa::registry::NodeRegistry;
use glossa::task::now_local;
use glossa_testkit::{InMemoryBroker, InMemoryTaskStore};

pub type TestRegistry = NodeRegistry<InMemoryBroker, InMemoryTaskStore>;
pub type TestDispatcher = Dispatcher<InMemoryBroker, InMemoryTaskStore>;
pub type TestReconciler = HeartbeatReconciler<InMemoryBroker, InMemoryTaskStore>;

pub struct Harness {
    pub broker: Arc<InMemoryBroker>,
    pub store: Arc<InMemoryTaskStore>,
    pub locks: Arc<LockService<InMemoryBroker>>,
    pub registry: Arc<TestRegistry>,
    pub dispatcher: Arc<TestDispatcher>,
    pub reconciler: Arc<TestReconciler>,
    pub config: DispatchConfig,
}

/// Wire the full stack over the in-memory backends.
pub fn harness() -> Harness {
    let config = DispatchConfig::default();
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryTaskStore::new());
    let locks = Arc::new(LockService::new(Arc::clone(&broker)));
    let registry = Arc::new(NodeRegistry::new(
        Arc::clone(&broker),
        Arc::clone(&store),
        Arc::clone(&locks),
        config.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&broker),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&locks),
        config.clone(),
    ));
    let reconciler = Arc::new(HeartbeatReconciler::new(
        Arc::clone(&broker),
        Arc::clone(&registry),
        config.clone(),
    ));

    Harness {
        broker,
        store,
        locks,
        registry,
        dispatcher,
        reconciler,
        config,
    }
}

/// A healthy node that heartbeated just now.
pub fn online_node(id: &str) -> WorkerNode {
    WorkerNode {
        node_id: NodeId::from(id),
        host: "10.0.0.1".to_string(),
        port: 9090,
        memory_total: 16_000,
        memory_used: 4_000,
        cpu_usage: 20.0,
        gpu_available: true,
        status: NodeStatus::Online,
        last_heartbeat: Some(now_local()),
        active_task_count: 2,
    }
}
