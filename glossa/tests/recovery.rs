//! Stuck-task reclamation and cancellation tests.

mod common;

use chrono::Duration;
use glossa::broker::keys;
use glossa::message::{ControlMessage, PendingTask};
use glossa::node::NodeId;
use glossa::store::{TaskOutcome, TaskStore};
use glossa::task::{now_local, NewTask, TaskStatus};

fn text_task() -> NewTask {
    NewTask::text("en", vec!["zh".to_string()], "hello")
}

#[tokio::test]
async fn stuck_task_returns_to_pending_with_a_bumped_retry() {
    let h = common::harness();
    let node_id = NodeId::from("n1");

    let task = h.store.insert(text_task()).await.unwrap();
    assert!(h.store.mark_processing(&task.id, &node_id).await.unwrap());
    h.store
        .backdate_updated_at(&task.id, now_local() - Duration::minutes(31));

    h.dispatcher.recover_stuck_once().await.unwrap();

    let stored = h.store.find(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);
    assert!(stored.assigned_node_id.is_none());
    assert_eq!(stored.retry_count, 1);

    let parked = h.broker.list_items(keys::PENDING_TASKS);
    assert_eq!(parked.len(), 1);
    let envelope: PendingTask = serde_json::from_str(&parked[0]).unwrap();
    assert_eq!(envelope.task_id, task.id);
    assert_eq!(envelope.retry_count, 1);
}

#[tokio::test]
async fn recovery_budget_exhaustion_fails_the_task() {
    let h = common::harness();
    let node_id = NodeId::from("n1");

    let task = h.store.insert(text_task()).await.unwrap();
    assert!(h.store.mark_processing(&task.id, &node_id).await.unwrap());
    h.store.set_retry_count(&task.id, 10);
    h.store
        .backdate_updated_at(&task.id, now_local() - Duration::minutes(31));

    h.dispatcher.recover_stuck_once().await.unwrap();

    let stored = h.store.find(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("Task failed after 10 recovery attempts")
    );
    assert!(h.broker.list_items(keys::PENDING_TASKS).is_empty());
}

#[tokio::test]
async fn recently_updated_processing_task_is_left_alone() {
    let h = common::harness();
    let node_id = NodeId::from("n1");

    let task = h.store.insert(text_task()).await.unwrap();
    assert!(h.store.mark_processing(&task.id, &node_id).await.unwrap());

    h.dispatcher.recover_stuck_once().await.unwrap();

    let stored = h.store.find(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
    assert_eq!(stored.retry_count, 0);
    assert!(h.broker.list_items(keys::PENDING_TASKS).is_empty());
}

#[tokio::test]
async fn cancellation_sends_one_control_message_and_stays_terminal() {
    let h = common::harness();
    let node_id = NodeId::from("n1");

    let task = h.store.insert(text_task()).await.unwrap();
    assert!(h.store.mark_processing(&task.id, &node_id).await.unwrap());

    // The caller marks the row cancelled first, then tells the node.
    assert!(h
        .store
        .record_outcome(&task.id, TaskStatus::Cancelled, TaskOutcome::default())
        .await
        .unwrap());
    h.dispatcher.cancel(&task.id, &node_id).await.unwrap();

    let control = h.broker.list_items(&keys::control_queue(&node_id));
    assert_eq!(control.len(), 1);
    let message: ControlMessage = serde_json::from_str(&control[0]).unwrap();
    let ControlMessage::CancelTask { task_id, .. } = message;
    assert_eq!(task_id, task.id);

    // A cancelled task is terminal: even aged far past the stuck threshold
    // the reclaimer leaves it be.
    h.store
        .backdate_updated_at(&task.id, now_local() - Duration::minutes(45));
    h.dispatcher.recover_stuck_once().await.unwrap();

    let stored = h.store.find(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    assert!(h.broker.list_items(keys::PENDING_TASKS).is_empty());
}

#[tokio::test]
async fn reclaimed_task_can_be_placed_again_by_the_drain() {
    let h = common::harness();
    let node_id = NodeId::from("n1");

    let task = h.store.insert(text_task()).await.unwrap();
    assert!(h.store.mark_processing(&task.id, &node_id).await.unwrap());
    h.store
        .backdate_updated_at(&task.id, now_local() - Duration::minutes(31));

    h.dispatcher.recover_stuck_once().await.unwrap();

    // The node recovered and heartbeats again.
    h.broker.register_node(&common::online_node("n1"), 1.0);
    h.dispatcher.drain_pending_once().await.unwrap();

    let stored = h.store.find(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
    assert_eq!(stored.assigned_node_id, Some(node_id));
    assert_eq!(stored.retry_count, 1);
}
