//! The scheduler and task state-machine driver.
//!
//! The dispatcher owns three paths into the task lifecycle: the synchronous
//! fast path called from the creation surface, the pending-queue drain that
//! retries tasks no node could take, and the stuck-task reclaimer that
//! returns orphaned work to the queue. All three coordinate through
//! short-lived broker locks, and the repository stays the single source of
//! truth throughout.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn, Instrument};

use crate::broker::{keys, Broker};
use crate::config::DispatchConfig;
use crate::lock::LockService;
use crate::message::{ControlMessage, PendingTask, TaskAssignment};
use crate::node::{NodeId, WorkerNode};
use crate::registry::NodeRegistry;
use crate::runtime::{spawn_fixed_delay, ShutdownToken};
use crate::store::TaskStore;
use crate::task::{now_local, NewTask, Task, TaskId, TaskStatus};
use crate::telemetry;

const DISPATCH_LOCK_TTL: Duration = Duration::from_secs(10);
const DISPATCH_LOCK_WAIT: Duration = Duration::from_secs(2);
const HANDOFF_LOCK_TTL: Duration = Duration::from_secs(5);
const HANDOFF_LOCK_WAIT: Duration = Duration::from_secs(1);
const PENDING_LOCK_TTL: Duration = Duration::from_secs(10);
const PENDING_LOCK_WAIT: Duration = Duration::from_secs(5);
const RECLAIM_SWEEP_LOCK_TTL: Duration = Duration::from_secs(60);
const RECLAIM_TASK_LOCK_TTL: Duration = Duration::from_secs(10);
const RECLAIM_TASK_LOCK_WAIT: Duration = Duration::from_secs(1);

/// What a `dispatch` call tells its caller.
///
/// `Accepted` covers both "handed off to a node" and "parked for the
/// sweeper" — the distinction is only observable through the task row.
/// `Busy` means another dispatcher holds the task and this call did nothing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    Accepted,
    Busy,
}

pub struct Dispatcher<B, S> {
    broker: Arc<B>,
    store: Arc<S>,
    registry: Arc<NodeRegistry<B, S>>,
    locks: Arc<LockService<B>>,
    config: DispatchConfig,
}

impl<B, S> Dispatcher<B, S>
where
    B: Broker + 'static,
    S: TaskStore + 'static,
{
    pub fn new(
        broker: Arc<B>,
        store: Arc<S>,
        registry: Arc<NodeRegistry<B, S>>,
        locks: Arc<LockService<B>>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            broker,
            store,
            registry,
            locks,
            config,
        }
    }

    /// Persist a new task and try to place it immediately.
    ///
    /// The task is durable as soon as this returns, whether or not a node
    /// took it: dispatch failures leave it PENDING for the sweeper.
    pub async fn submit(&self, new_task: NewTask) -> anyhow::Result<Task> {
        let task = self.store.insert(new_task).await?;
        info!(task_id = %task.id, "task accepted");

        if let Err(err) = self.dispatch(&task).await {
            warn!(task_id = %task.id, "initial dispatch failed, task stays pending: {err:#}");
        }
        Ok(task)
    }

    /// Fast-path dispatch of a pending task.
    ///
    /// Guarded by `task_dispatch:{id}`. Re-reads the task under the lock; a
    /// task someone else already progressed counts as accepted. When no node
    /// qualifies the task is parked on the pending queue.
    pub async fn dispatch(&self, task: &Task) -> anyhow::Result<DispatchOutcome> {
        let key = keys::task_dispatch(&task.id);
        let ran = self
            .locks
            .with_lock(&key, DISPATCH_LOCK_TTL, DISPATCH_LOCK_WAIT, || {
                async {
                    let Some(current) = self.store.find(&task.id).await? else {
                        warn!(task_id = %task.id, "task vanished before dispatch");
                        return Ok(());
                    };
                    if current.status != TaskStatus::Pending {
                        debug!(
                            task_id = %current.id,
                            status = %current.status,
                            "task already progressed, nothing to dispatch"
                        );
                        return Ok(());
                    }

                    self.store.mark_dispatching(&current.id).await?;

                    match self.registry.select_optimal().await {
                        Some(node) => {
                            if !self.handoff(&current, &node).await? {
                                self.park(&current).await?;
                            }
                        }
                        None => self.park(&current).await?,
                    }
                    Ok(())
                }
                .instrument(telemetry::dispatch_span(task.id.as_str()))
            })
            .await?;

        Ok(match ran {
            Some(()) => DispatchOutcome::Accepted,
            None => DispatchOutcome::Busy,
        })
    }

    /// Hand a task to a specific node under that node's dispatch lock.
    ///
    /// The repository count is re-checked inside the lock — this is the only
    /// defense against two dispatchers that selected the same node through
    /// different shards. The work message is pushed before the status write;
    /// workers tolerate receiving a task that still reads DISPATCHING.
    async fn handoff(&self, task: &Task, node: &WorkerNode) -> anyhow::Result<bool> {
        let key = keys::node_dispatch(&node.node_id);
        let outcome = self
            .locks
            .with_lock(&key, HANDOFF_LOCK_TTL, HANDOFF_LOCK_WAIT, || {
                async {
                    let live = self.store.count_processing(&node.node_id).await?;
                    if live >= self.config.per_node_capacity {
                        debug!(
                            node_id = %node.node_id,
                            live,
                            "node reached capacity between selection and handoff"
                        );
                        return Ok(false);
                    }

                    let assignment = TaskAssignment::from_task(task);
                    self.broker
                        .list_push_head(
                            &keys::task_queue(&node.node_id),
                            &serde_json::to_string(&assignment)?,
                        )
                        .await?;

                    self.store.mark_processing(&task.id, &node.node_id).await?;
                    telemetry::record_task_dispatched(node.node_id.as_str());
                    info!(task_id = %task.id, node_id = %node.node_id, "task handed off");
                    Ok(true)
                }
                .instrument(telemetry::handoff_span(
                    task.id.as_str(),
                    node.node_id.as_str(),
                ))
            })
            .await?;

        Ok(outcome.unwrap_or(false))
    }

    /// Park an unplaceable task on the global pending queue.
    ///
    /// The DISPATCHING marker is rolled back first so the drain's PENDING
    /// guard will accept the envelope later.
    async fn park(&self, task: &Task) -> anyhow::Result<()> {
        self.store.revert_to_pending(&task.id).await?;
        let envelope = PendingTask::new(task.id.clone(), task.retry_count);
        self.push_pending(&envelope).await?;
        telemetry::record_task_parked();
        info!(task_id = %task.id, "no node available, task parked");
        Ok(())
    }

    async fn push_pending(&self, envelope: &PendingTask) -> anyhow::Result<()> {
        self.broker
            .list_push_head(keys::PENDING_TASKS, &serde_json::to_string(envelope)?)
            .await
    }

    /// One pending-drain tick: pop a single envelope from the queue tail and
    /// try to place its task.
    ///
    /// Requeued envelopes go back to the *head*, so a task that just failed
    /// to place retries before older arrivals.
    pub async fn drain_pending_once(&self) -> anyhow::Result<()> {
        let depth = self.broker.list_len(keys::PENDING_TASKS).await?;
        telemetry::set_pending_depth(depth as f64);

        let Some(raw) = self.broker.list_pop_tail(keys::PENDING_TASKS).await? else {
            return Ok(());
        };

        let envelope: PendingTask = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("dropping malformed pending envelope: {err}");
                return Ok(());
            }
        };

        let key = keys::pending_task_process(&envelope.task_id);
        let ran = self
            .locks
            .with_lock(&key, PENDING_LOCK_TTL, PENDING_LOCK_WAIT, || {
                self.process_pending(&envelope)
            })
            .await?;
        if ran.is_none() {
            debug!(task_id = %envelope.task_id, "pending envelope contended, skipping this tick");
        }
        Ok(())
    }

    async fn process_pending(&self, envelope: &PendingTask) -> anyhow::Result<()> {
        let Some(task) = self.store.find(&envelope.task_id).await? else {
            debug!(task_id = %envelope.task_id, "pending envelope for unknown task, dropping");
            return Ok(());
        };
        if task.status != TaskStatus::Pending {
            debug!(
                task_id = %task.id,
                status = %task.status,
                "pending envelope superseded, dropping"
            );
            return Ok(());
        }

        match self.registry.select_optimal().await {
            Some(node) => {
                if !self.handoff(&task, &node).await? {
                    self.push_pending(&envelope.retried()).await?;
                }
            }
            None if envelope.retry_count < self.config.max_retry_attempts => {
                self.push_pending(&envelope.retried()).await?;
            }
            None => {
                let message = format!(
                    "No available nodes after {} retry attempts",
                    self.config.max_retry_attempts
                );
                self.store.mark_failed(&task.id, &message).await?;
                telemetry::record_task_failed("no_available_nodes");
                warn!(task_id = %task.id, "task failed: {message}");
            }
        }
        Ok(())
    }

    /// One reclaimer sweep: return long-stuck PROCESSING tasks to PENDING,
    /// or fail them once their recovery budget is spent.
    ///
    /// The whole sweep runs under a global lock with zero wait — if another
    /// instance is already sweeping, this tick is skipped.
    pub async fn recover_stuck_once(&self) -> anyhow::Result<()> {
        let ran = self
            .locks
            .with_lock(
                keys::RECOVER_STUCK_TASKS_LOCK,
                RECLAIM_SWEEP_LOCK_TTL,
                Duration::ZERO,
                || {
                    async {
                        let threshold = now_local() - self.config.stuck_threshold();
                        let stuck = self.store.list_stuck(threshold).await?;
                        if !stuck.is_empty() {
                            info!(count = stuck.len(), "reclaiming stuck tasks");
                        }
                        for task in stuck {
                            if let Err(err) = self.recover_task(&task.id, threshold).await {
                                warn!(task_id = %task.id, "stuck-task recovery failed: {err:#}");
                            }
                        }
                        Ok(())
                    }
                    .instrument(telemetry::sweep_span("recover_stuck_tasks"))
                },
            )
            .await?;
        if ran.is_none() {
            debug!("another instance is reclaiming, skipping this tick");
        }
        Ok(())
    }

    async fn recover_task(
        &self,
        task_id: &TaskId,
        threshold: chrono::NaiveDateTime,
    ) -> anyhow::Result<()> {
        let key = keys::task_recover(task_id);
        let ran = self
            .locks
            .with_lock(&key, RECLAIM_TASK_LOCK_TTL, RECLAIM_TASK_LOCK_WAIT, || async {
                let Some(task) = self.store.find(task_id).await? else {
                    return Ok(());
                };
                // The listing is a snapshot; anything that made progress in
                // the meantime is no longer ours to touch.
                if task.status != TaskStatus::Processing || task.updated_at >= threshold {
                    return Ok(());
                }

                let new_retry = task.retry_count + 1;
                if new_retry <= self.config.max_retry_attempts {
                    self.store.release_for_retry(&task.id, new_retry).await?;
                    self.push_pending(&PendingTask::new(task.id.clone(), new_retry))
                        .await?;
                    telemetry::record_task_reclaimed();
                    info!(
                        task_id = %task.id,
                        retry = new_retry,
                        "stuck task returned to pending"
                    );
                } else {
                    let message = format!(
                        "Task failed after {} recovery attempts",
                        self.config.max_retry_attempts
                    );
                    self.store.mark_failed(&task.id, &message).await?;
                    telemetry::record_task_failed("recovery_exhausted");
                    warn!(task_id = %task.id, "task failed: {message}");
                }
                Ok(())
            })
            .await?;
        if ran.is_none() {
            debug!(task_id = %task_id, "recovery lock contended, leaving task for next sweep");
        }
        Ok(())
    }

    /// Push a cancellation command onto a node's control queue.
    ///
    /// Fire-and-forget: the task's status is the caller's responsibility
    /// (set CANCELLED in the repository first, then send this).
    pub async fn cancel(&self, task_id: &TaskId, node_id: &NodeId) -> anyhow::Result<()> {
        let message = ControlMessage::cancel(task_id.clone());
        self.broker
            .list_push_head(
                &keys::control_queue(node_id),
                &serde_json::to_string(&message)?,
            )
            .await?;
        info!(task_id = %task_id, node_id = %node_id, "cancellation sent");
        Ok(())
    }

    /// Spawn the pending drain and the stuck-task reclaimer.
    ///
    /// The drain fires immediately and then every `pending_drain_interval`;
    /// the reclaimer waits one full interval before its first sweep.
    pub fn spawn_sweepers(self: &Arc<Self>, shutdown: &ShutdownToken) -> Vec<tokio::task::JoinHandle<()>> {
        let drain = {
            let dispatcher = Arc::clone(self);
            spawn_fixed_delay(
                "pending_drain",
                Duration::ZERO,
                self.config.pending_drain_interval(),
                shutdown.clone(),
                move || {
                    let dispatcher = Arc::clone(&dispatcher);
                    async move { dispatcher.drain_pending_once().await }
                },
            )
        };

        let reclaimer = {
            let dispatcher = Arc::clone(self);
            spawn_fixed_delay(
                "stuck_task_reclaimer",
                self.config.reclaimer_interval(),
                self.config.reclaimer_interval(),
                shutdown.clone(),
                move || {
                    let dispatcher = Arc::clone(&dispatcher);
                    async move { dispatcher.recover_stuck_once().await }
                },
            )
        };

        vec![drain, reclaimer]
    }
}
