use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use glossa::broker::{keys, Broker};
use glossa::node::WorkerNode;
use parking_lot::Mutex;

/// In-memory broker keyspace.
///
/// Lock keys written through [`set_if_absent`](Broker::set_if_absent) honor
/// their TTL: an expired key reads as absent, exactly like the real broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, ExpiringValue>,
}

struct ExpiringValue {
    #[allow(dead_code)]
    value: String,
    expires_at: Option<Instant>,
}

impl BrokerState {
    fn purge_expired(&mut self, key: &str) {
        if let Some(entry) = self.values.get(key) {
            if entry.expires_at.is_some_and(|at| at <= Instant::now()) {
                self.values.remove(key);
            }
        }
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member to a set.
    pub fn sadd(&self, key: &str, member: &str) {
        self.state
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    /// Replace a hash wholesale.
    pub fn hset_all(&self, key: &str, fields: HashMap<String, String>) {
        self.state.lock().hashes.insert(key.to_string(), fields);
    }

    /// Add or update a sorted-set member.
    pub fn zadd(&self, key: &str, member: &str, score: f64) {
        self.state
            .lock()
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
    }

    /// Current list contents, head first.
    pub fn list_items(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a set contains a member.
    pub fn set_contains(&self, key: &str, member: &str) -> bool {
        self.state
            .lock()
            .sets
            .get(key)
            .is_some_and(|set| set.contains(member))
    }

    /// Register a node the way a heartbeating worker would: hash, active-set
    /// membership, and ranking entry.
    pub fn register_node(&self, node: &WorkerNode, rank: f64) {
        self.hset_all(&keys::worker_node(&node.node_id), node.to_hash());
        self.sadd(keys::ACTIVE_NODES, node.node_id.as_str());
        self.zadd(keys::NODE_RANKINGS, node.node_id.as_str(), rank);
    }

    /// Snapshot of the whole active-node view, for idempotence assertions.
    pub fn registry_snapshot(&self) -> (Vec<String>, Vec<String>) {
        let state = self.state.lock();
        let active = state
            .sets
            .get(keys::ACTIVE_NODES)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let ranked = state
            .zsets
            .get(keys::NODE_RANKINGS)
            .map(|zset| {
                let mut members: Vec<String> = zset.keys().cloned().collect();
                members.sort();
                members
            })
            .unwrap_or_default();
        (active, ranked)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()> {
        if let Some(set) = self.state.lock().sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        Ok(self
            .state
            .lock()
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn sorted_set_range(&self, key: &str) -> anyhow::Result<Vec<(String, f64)>> {
        let mut entries: Vec<(String, f64)> = self
            .state
            .lock()
            .zsets
            .get(key)
            .map(|zset| zset.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then_with(|| a.0.cmp(&b.0)));
        Ok(entries)
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> anyhow::Result<()> {
        if let Some(zset) = self.state.lock().zsets.get_mut(key) {
            zset.remove(member);
        }
        Ok(())
    }

    async fn list_push_head(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.state
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_pop_tail(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .state
            .lock()
            .lists
            .get_mut(key)
            .and_then(|list| list.pop_back()))
    }

    async fn list_len(&self, key: &str) -> anyhow::Result<u64> {
        Ok(self
            .state
            .lock()
            .lists
            .get(key)
            .map(|list| list.len() as u64)
            .unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.values.remove(key);
        state.sets.remove(key);
        state.hashes.remove(key);
        state.zsets.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        state.purge_expired(key);
        if state.values.contains_key(key) {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            ExpiringValue {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }
}
