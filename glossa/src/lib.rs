//! Glossa - task dispatch and node management for a distributed speech
//! translation platform.
//!
//! Glossa is the scheduling core that sits between the client-facing entry
//! points and an elastic fleet of speech/translation workers. It persists
//! translation tasks durably, selects a worker node under load-aware policy,
//! delivers the work through a shared broker, and runs the background sweeps
//! that keep the two views consistent.
//!
//! # Core concepts
//!
//! - **Task**: one unit of translation work — inline text or a stored audio
//!   artifact plus one or more target languages. The [`TaskStore`] is the
//!   single source of truth for task state.
//!
//! - **Broker**: the shared keyspace ([`Broker`]) where workers advertise
//!   themselves and where per-node work queues, control queues and the
//!   global pending queue live. The broker holds only hints, never
//!   authoritative state.
//!
//! - **Node registry**: the [`NodeRegistry`] turns the broker's view of
//!   workers into ranked dispatch candidates and evicts entries that stopped
//!   heartbeating.
//!
//! - **Dispatcher**: the [`Dispatcher`] drives the task state machine —
//!   fast-path placement at creation, a pending-queue drain for tasks no
//!   node could take, and a reclaimer that rescues work stuck on dead nodes.
//!
//! - **Locks**: the [`LockService`] provides short-lived, TTL-expiring
//!   mutual exclusion over broker keys, so concurrent dispatcher instances
//!   coordinate without a coordinator.
//!
//! # Feature flags
//!
//! - `postgres` - PostgreSQL task store via sqlx (see `migrations/`)
//! - `redis` - Redis broker client
//! - `metrics` - Prometheus instrumentation
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use glossa::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = Arc::new(RedisBroker::connect("redis://localhost:6379/0").await?);
//!     let store = Arc::new(PgTaskStore::connect(&persistence_config).await?);
//!     let locks = Arc::new(LockService::new(Arc::clone(&broker)));
//!     let config = DispatchConfig::default();
//!
//!     let registry = Arc::new(NodeRegistry::new(
//!         Arc::clone(&broker), Arc::clone(&store), Arc::clone(&locks), config.clone(),
//!     ));
//!     let dispatcher = Arc::new(Dispatcher::new(
//!         broker, store, Arc::clone(&registry), locks, config,
//!     ));
//!
//!     let shutdown = ShutdownToken::new();
//!     dispatcher.spawn_sweepers(&shutdown);
//!
//!     let task = dispatcher
//!         .submit(NewTask::text("en", vec!["zh".into()], "hello"))
//!         .await?;
//!     println!("accepted {}", task.id);
//!     Ok(())
//! }
//! ```
//!
//! All components are wired through explicit constructor dependencies; there
//! are no process-wide singletons.

/// The shared broker seam and its key namespace.
pub mod broker;

/// Configuration structures and documented defaults.
pub mod config;

/// The scheduler: fast-path dispatch, pending drain, stuck-task reclaim.
pub mod dispatcher;

/// Short-lived mutual exclusion over broker keys.
pub mod lock;

/// Broker message bodies: pending envelopes, work and control messages.
pub mod message;

/// Worker node model and status mapping.
pub mod node;

/// Heartbeat-driven registry pruning.
pub mod reconciler;

/// Ranked view of live worker nodes.
pub mod registry;

/// Shutdown token and fixed-delay sweep spawner.
pub mod runtime;

/// Durable task repository seam.
pub mod store;

/// Task model and lifecycle states.
pub mod task;

/// Tracing spans and metric shims.
pub mod telemetry;

#[cfg(feature = "metrics")]
/// Prometheus metrics (feature `metrics`).
pub mod metrics;

pub use broker::Broker;
#[cfg(feature = "redis")]
pub use broker::RedisBroker;
pub use config::{BrokerConfig, DispatchConfig, PersistenceConfig};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use lock::{LockService, LockToken};
pub use message::{ControlMessage, PendingTask, TaskAssignment};
pub use node::{NodeId, NodeStatus, WorkerNode};
pub use reconciler::HeartbeatReconciler;
pub use registry::NodeRegistry;
pub use runtime::{spawn_fixed_delay, ShutdownToken};
#[cfg(feature = "postgres")]
pub use store::PgTaskStore;
pub use store::{TaskFilter, TaskOutcome, TaskStore};
pub use task::{now_local, NewTask, Task, TaskId, TaskStatus};
