use std::collections::HashMap;
use std::fmt::Display;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Identifier of a worker node as advertised in the shared registry.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Status a worker advertises for itself.
///
/// Workers also publish `SHUTTING_DOWN` during drain; it reads back as
/// [`Offline`](NodeStatus::Offline), as does any unrecognized value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Online,
    Offline,
    Busy,
    Maintenance,
}

impl NodeStatus {
    /// Parse the advertised status string, case-insensitively.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "ONLINE" => NodeStatus::Online,
            "BUSY" => NodeStatus::Busy,
            "MAINTENANCE" => NodeStatus::Maintenance,
            _ => NodeStatus::Offline,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "ONLINE",
            NodeStatus::Offline => "OFFLINE",
            NodeStatus::Busy => "BUSY",
            NodeStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A live worker node, as read from its registry hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerNode {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub memory_total: u64,
    pub memory_used: u64,
    pub cpu_usage: f64,
    pub gpu_available: bool,
    pub status: NodeStatus,
    pub last_heartbeat: Option<NaiveDateTime>,
    pub active_task_count: u32,
}

impl WorkerNode {
    /// Reconstruct a node from its registry hash.
    ///
    /// Returns `None` when the hash is empty (the node has expired or never
    /// registered). Individual fields are parsed leniently: workers publish
    /// everything as strings and partially written hashes must still resolve.
    pub fn from_hash(node_id: &str, hash: &HashMap<String, String>) -> Option<Self> {
        if hash.is_empty() {
            return None;
        }

        fn field<T: std::str::FromStr>(hash: &HashMap<String, String>, key: &str) -> Option<T> {
            hash.get(key).and_then(|raw| raw.trim().parse().ok())
        }

        let status = hash
            .get("status")
            .map(|raw| NodeStatus::parse(raw))
            .unwrap_or(NodeStatus::Offline);

        let gpu_available = hash
            .get("gpu_available")
            .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false);

        Some(Self {
            node_id: NodeId::new(node_id),
            host: hash.get("host").cloned().unwrap_or_default(),
            port: field(hash, "port").unwrap_or(0),
            memory_total: field(hash, "memory_total").unwrap_or(0),
            memory_used: field(hash, "memory_used").unwrap_or(0),
            cpu_usage: field(hash, "cpu_usage").unwrap_or(0.0),
            gpu_available,
            status,
            last_heartbeat: field(hash, "last_heartbeat"),
            active_task_count: field(hash, "active_task_count").unwrap_or(0),
        })
    }

    /// Serialize the node back into registry hash form.
    ///
    /// The dispatch core never writes node hashes itself; this is the
    /// inverse of [`from_hash`](WorkerNode::from_hash) for fixtures and the
    /// testkit.
    pub fn to_hash(&self) -> HashMap<String, String> {
        let mut hash = HashMap::from([
            ("host".to_string(), self.host.clone()),
            ("port".to_string(), self.port.to_string()),
            ("memory_total".to_string(), self.memory_total.to_string()),
            ("memory_used".to_string(), self.memory_used.to_string()),
            ("cpu_usage".to_string(), self.cpu_usage.to_string()),
            (
                "gpu_available".to_string(),
                if self.gpu_available { "1" } else { "0" }.to_string(),
            ),
            ("status".to_string(), self.status.as_str().to_string()),
            (
                "active_task_count".to_string(),
                self.active_task_count.to_string(),
            ),
        ]);
        if let Some(heartbeat) = self.last_heartbeat {
            hash.insert(
                "last_heartbeat".to_string(),
                heartbeat.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            );
        }
        hash
    }

    /// Whether the node heartbeated within the liveness window.
    pub fn heartbeat_within(&self, window: Duration, now: NaiveDateTime) -> bool {
        match self.last_heartbeat {
            Some(heartbeat) => now.signed_duration_since(heartbeat) <= window,
            None => false,
        }
    }

    /// Load score used to pick a dispatch target; lower is better.
    ///
    /// `cpu% + memory% + 10 per active task`, with the memory term dropped
    /// when the worker never reported its total.
    pub fn dispatch_score(&self) -> f64 {
        let memory_ratio = if self.memory_total == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_total as f64
        };
        self.cpu_usage + memory_ratio * 100.0 + self.active_task_count as f64 * 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::now_local;

    fn hash_with_status(status: &str) -> HashMap<String, String> {
        HashMap::from([
            ("host".to_string(), "10.0.0.7".to_string()),
            ("port".to_string(), "9090".to_string()),
            ("memory_total".to_string(), "16000".to_string()),
            ("memory_used".to_string(), "4000".to_string()),
            ("cpu_usage".to_string(), "20.0".to_string()),
            ("gpu_available".to_string(), "1".to_string()),
            ("active_task_count".to_string(), "2".to_string()),
            ("status".to_string(), status.to_string()),
        ])
    }

    #[test]
    fn status_mapping_covers_all_advertised_values() {
        assert_eq!(NodeStatus::parse("ONLINE"), NodeStatus::Online);
        assert_eq!(NodeStatus::parse("OFFLINE"), NodeStatus::Offline);
        assert_eq!(NodeStatus::parse("BUSY"), NodeStatus::Busy);
        assert_eq!(NodeStatus::parse("MAINTENANCE"), NodeStatus::Maintenance);
        assert_eq!(NodeStatus::parse("SHUTTING_DOWN"), NodeStatus::Offline);
        assert_eq!(NodeStatus::parse("banana"), NodeStatus::Offline);
        // Case is not significant on the wire.
        assert_eq!(NodeStatus::parse("online"), NodeStatus::Online);
    }

    #[test]
    fn status_round_trips_through_hash() {
        for status in ["ONLINE", "OFFLINE", "BUSY", "MAINTENANCE"] {
            let node = WorkerNode::from_hash("n1", &hash_with_status(status)).unwrap();
            let written = node.to_hash();
            let reread = WorkerNode::from_hash("n1", &written).unwrap();
            assert_eq!(reread.status, node.status);
        }
    }

    #[test]
    fn empty_hash_yields_no_node() {
        assert!(WorkerNode::from_hash("n1", &HashMap::new()).is_none());
    }

    #[test]
    fn lenient_parse_of_partial_hash() {
        let hash = HashMap::from([("status".to_string(), "ONLINE".to_string())]);
        let node = WorkerNode::from_hash("n1", &hash).unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.memory_total, 0);
        assert!(node.last_heartbeat.is_none());
    }

    #[test]
    fn dispatch_score_weights_cpu_memory_and_load() {
        let node = WorkerNode::from_hash("n1", &hash_with_status("ONLINE")).unwrap();
        // 20 cpu + 25 memory + 2 tasks * 10
        assert!((node.dispatch_score() - 65.0).abs() < f64::EPSILON);
    }

    #[test]
    fn heartbeat_window() {
        let now = now_local();
        let mut node = WorkerNode::from_hash("n1", &hash_with_status("ONLINE")).unwrap();
        node.last_heartbeat = Some(now - Duration::minutes(4));
        assert!(node.heartbeat_within(Duration::minutes(5), now));
        node.last_heartbeat = Some(now - Duration::minutes(6));
        assert!(!node.heartbeat_within(Duration::minutes(5), now));
        node.last_heartbeat = None;
        assert!(!node.heartbeat_within(Duration::minutes(5), now));
    }
}
