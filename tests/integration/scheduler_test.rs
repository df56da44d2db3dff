//! Integration tests for one-off scheduling, querying, and cleanup.

mod helpers;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use taskhub_core::config::NodeRole;
use taskhub_core::config::scheduler::SchedulerConfig;
use taskhub_entity::TaskState;
use taskhub_queue::TaskQueue;
use taskhub_worker::{ScheduleRequest, TaskFailure, TaskHandler};

use helpers::{Cluster, ScriptedHandler};

fn config(role: NodeRole) -> SchedulerConfig {
    SchedulerConfig {
        role,
        ..SchedulerConfig::default()
    }
}

fn scripted(event_id: &str) -> Vec<Arc<dyn TaskHandler>> {
    vec![ScriptedHandler::new(event_id) as Arc<dyn TaskHandler>]
}

#[tokio::test]
async fn test_unexecuted_task_times_out_empty() {
    let cluster = Cluster::new();
    let node = cluster.node(config(NodeRole::Client), Vec::new());

    let started = Instant::now();
    let handle = node
        .scheduler
        .schedule(
            ScheduleRequest::new("sendEmail")
                .context(json!({"to": "a@example.com"}))
                .timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();
    let id = handle.task_id().unwrap();

    assert_eq!(handle.await, Ok(None));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "resolved early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "resolved late: {elapsed:?}");

    let record = cluster.queue.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Failed);
    assert!(record.result.is_none());
    node.stop().await;
}

#[tokio::test]
async fn test_hung_executor_times_out_within_bound() {
    let cluster = Cluster::new();
    let node = cluster.node(config(NodeRole::Combined), scripted("sendEmail"));

    let started = Instant::now();
    let handle = node
        .scheduler
        .schedule(
            ScheduleRequest::new("sendEmail")
                .context(json!({"sleep_ms": 500}))
                .timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();
    let id = handle.task_id().unwrap();

    assert_eq!(handle.await, Ok(None));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "resolved early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(150), "resolved late: {elapsed:?}");

    let record = cluster.queue.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Failed);
    node.stop().await;
}

#[tokio::test]
async fn test_result_propagates_to_caller() {
    let cluster = Cluster::new();
    let node = cluster.node(config(NodeRole::Combined), scripted("sendEmail"));

    let result = node
        .scheduler
        .schedule(
            ScheduleRequest::new("sendEmail")
                .context(json!({"result": {"sent": 1}}))
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap()
        .await;

    assert_eq!(result, Ok(Some(json!({"sent": 1}))));
    node.stop().await;
}

#[tokio::test]
async fn test_error_propagates_to_caller() {
    let cluster = Cluster::new();
    let node = cluster.node(config(NodeRole::Combined), scripted("sendEmail"));

    let result = node
        .scheduler
        .schedule(
            ScheduleRequest::new("sendEmail")
                .context(json!({"err": "mailbox full"}))
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap()
        .await;

    assert_eq!(result, Err(TaskFailure(json!("mailbox full"))));
    node.stop().await;
}

#[tokio::test]
async fn test_push_events_need_push_lane() {
    let cluster = Cluster::new();
    let mut cfg = config(NodeRole::Worker);
    cfg.push_events = vec!["activity.push".to_string()];
    let worker = cluster.node(cfg.clone(), scripted("activity.push"));

    let handle = worker
        .scheduler
        .schedule(
            ScheduleRequest::new("activity.push")
                .context(json!({"result": "pushed"}))
                .timeout(Duration::from_millis(150)),
        )
        .await
        .unwrap();

    // A work-lane node never picks up push-lane records.
    assert_eq!(handle.await, Ok(None));

    cfg.role = NodeRole::Pusher;
    let pusher = cluster.node(cfg, scripted("activity.push"));
    let result = pusher
        .scheduler
        .schedule(
            ScheduleRequest::new("activity.push")
                .context(json!({"result": "pushed"}))
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap()
        .await;
    assert_eq!(result, Ok(Some(json!("pushed"))));

    worker.stop().await;
    pusher.stop().await;
}

#[tokio::test]
async fn test_delayed_task_runs_after_delay() {
    let cluster = Cluster::new();
    let node = cluster.node(config(NodeRole::Combined), scripted("sendEmail"));

    let handle = node
        .scheduler
        .schedule(
            ScheduleRequest::new("sendEmail")
                .context(json!({"result": "late"}))
                .delay(Duration::from_millis(100))
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    let id = handle.task_id().unwrap();

    assert!(node.scheduler.is_scheduled("sendEmail").await.unwrap());
    let record = cluster.queue.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Delayed);

    assert_eq!(handle.await, Ok(Some(json!("late"))));
    node.stop().await;
}

#[tokio::test]
async fn test_get_tasks_has_no_duplicates() {
    let cluster = Cluster::new();
    let node = cluster.node(config(NodeRole::Client), Vec::new());

    for i in 0..10 {
        node.scheduler
            .schedule(
                ScheduleRequest::new(if i % 2 == 0 { "sendEmail" } else { "report" })
                    .timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap();
    }

    let all = node.scheduler.get_tasks(None).await.unwrap();
    let ids: HashSet<_> = all.iter().map(|task| task.id).collect();
    assert_eq!(all.len(), 10);
    assert_eq!(ids.len(), 10);

    let emails = node.scheduler.get_tasks(Some("sendEmail")).await.unwrap();
    assert_eq!(emails.len(), 5);
    node.stop().await;
}

#[tokio::test]
async fn test_stuck_active_task_is_removed() {
    let cluster = Cluster::new();
    let mut cfg = config(NodeRole::Combined);
    cfg.stale_active_after_ms = 50;
    let node = cluster.node(cfg, scripted("sendEmail"));

    let handle = node
        .scheduler
        .schedule(
            ScheduleRequest::new("sendEmail")
                .context(json!({"sleep_ms": 600}))
                .timeout(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    let id = handle.task_id().unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(node.scheduler.get_tasks(Some("sendEmail")).await.unwrap().is_empty());
    assert!(cluster.queue.get(id).await.unwrap().is_none());

    // The removed record settles its waiter without a value.
    assert_eq!(handle.await, Ok(None));
    node.stop().await;
}

#[tokio::test]
async fn test_reaper_removes_finished_tasks() {
    let cluster = Cluster::new();
    let mut cfg = config(NodeRole::Combined);
    cfg.reaper.interval_ms = 50;
    cfg.reaper.retention_ms = 20;
    let node = cluster.node(cfg, scripted("sendEmail"));
    node.scheduler.init().await.unwrap();

    let handle = node
        .scheduler
        .schedule(
            ScheduleRequest::new("sendEmail")
                .context(json!({"result": true}))
                .timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();
    let id = handle.task_id().unwrap();
    assert_eq!(handle.await, Ok(Some(json!(true))));

    let mut reaped = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if cluster.queue.get(id).await.unwrap().is_none() {
            reaped = true;
            break;
        }
    }
    assert!(reaped, "finished task was never reaped");
    node.stop().await;
}

#[tokio::test]
async fn test_unschedule_removes_records() {
    let cluster = Cluster::new();
    let node = cluster.node(config(NodeRole::Client), Vec::new());

    let handle = node
        .scheduler
        .schedule(ScheduleRequest::new("report").timeout(Duration::from_secs(5)))
        .await
        .unwrap();
    node.scheduler
        .schedule(ScheduleRequest::new("sendEmail").timeout(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(node.scheduler.unschedule("report").await.unwrap(), 1);
    assert!(!node.scheduler.is_scheduled("report").await.unwrap());
    assert!(node.scheduler.is_scheduled("sendEmail").await.unwrap());
    assert_eq!(handle.await, Ok(None));
    node.stop().await;
}

#[tokio::test]
async fn test_shutdown_removes_everything() {
    let cluster = Cluster::new();
    let node = cluster.node(config(NodeRole::Client), Vec::new());

    for event in ["report", "sendEmail", "sendEmail"] {
        node.scheduler
            .schedule(ScheduleRequest::new(event).timeout(Duration::from_secs(5)))
            .await
            .unwrap();
    }

    assert_eq!(node.scheduler.shutdown().await.unwrap(), 3);
    assert!(cluster.queue.is_empty().await);
    node.stop().await;
}
