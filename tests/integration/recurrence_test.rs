//! Integration tests for recurring tasks across one and several nodes.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use taskhub_cache::keys;
use taskhub_core::config::NodeRole;
use taskhub_core::config::scheduler::SchedulerConfig;
use taskhub_core::traits::cache::CacheProvider;
use taskhub_worker::{ScheduleRequest, TaskHandler};

use helpers::{Cluster, CountingHandler};

fn worker_config() -> SchedulerConfig {
    SchedulerConfig {
        role: NodeRole::Worker,
        ..SchedulerConfig::default()
    }
}

fn cleanup_every(interval_ms: u64, delay_ms: u64) -> ScheduleRequest {
    ScheduleRequest::new("cleanup")
        .every(Duration::from_millis(interval_ms))
        .delay(Duration::from_millis(delay_ms))
        .timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_repeated_schedule_keeps_one_loop() {
    let cluster = Cluster::new();
    let counter = CountingHandler::new("cleanup", Duration::from_millis(10));
    let node = cluster.node(worker_config(), vec![counter.clone() as Arc<dyn TaskHandler>]);

    for _ in 0..3 {
        node.scheduler.schedule(cleanup_every(100, 10)).await.unwrap();
    }
    assert_eq!(node.scheduler.registry().len(), 1);

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(counter.runs() >= 2);
    assert_eq!(counter.peak(), 1);
    node.stop().await;
}

#[tokio::test]
async fn test_firings_are_separated_by_interval() {
    let cluster = Cluster::new();
    let counter = CountingHandler::new("cleanup", Duration::from_millis(20));
    let node = cluster.node(worker_config(), vec![counter.clone() as Arc<dyn TaskHandler>]);

    node.scheduler.schedule(cleanup_every(100, 5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(550)).await;

    assert!(counter.runs() >= 3, "only {} firings", counter.runs());
    let gap = counter.min_gap().unwrap();
    assert!(gap >= Duration::from_millis(100), "firings {gap:?} apart");

    let last_run = cluster.store.get(&keys::last_run("cleanup")).await.unwrap();
    assert!(last_run.unwrap().parse::<i64>().is_ok());
    node.stop().await;
}

#[tokio::test]
async fn test_unschedule_stops_loop() {
    let cluster = Cluster::new();
    let counter = CountingHandler::new("cleanup", Duration::from_millis(5));
    let node = cluster.node(worker_config(), vec![counter.clone() as Arc<dyn TaskHandler>]);

    node.scheduler.schedule(cleanup_every(50, 5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    node.scheduler.unschedule("cleanup").await.unwrap();
    assert!(node.scheduler.registry().is_empty());

    // Let an in-progress cycle finish, then confirm nothing new fires.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let runs = counter.runs();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.runs(), runs);
    node.stop().await;
}

#[tokio::test]
async fn test_two_nodes_fire_one_cleanup_at_a_time() {
    let cluster = Cluster::new();
    let counter = CountingHandler::new("cleanup", Duration::from_millis(40));
    let handlers = || vec![counter.clone() as Arc<dyn TaskHandler>];
    let node_a = cluster.node(worker_config(), handlers());
    let node_b = cluster.node(worker_config(), handlers());

    // Offset first evaluations so the two nodes never check at the same instant.
    node_a.scheduler.schedule(cleanup_every(200, 10)).await.unwrap();
    node_b.scheduler.schedule(cleanup_every(200, 110)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(900)).await;

    assert_eq!(counter.peak(), 1);
    assert!(counter.runs() >= 2);
    assert!(counter.runs() <= 5, "{} firings in 900ms", counter.runs());
    assert!(counter.min_gap().unwrap() >= Duration::from_millis(150));

    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test]
async fn test_lease_serializes_simultaneous_nodes() {
    let cluster = Cluster::new();
    let counter = CountingHandler::new("cleanup", Duration::from_millis(30));
    let config = SchedulerConfig {
        exclusive_lease: true,
        ..worker_config()
    };
    let node_a = cluster.node(config.clone(), vec![counter.clone() as Arc<dyn TaskHandler>]);
    let node_b = cluster.node(config, vec![counter.clone() as Arc<dyn TaskHandler>]);

    node_a.scheduler.schedule(cleanup_every(150, 10)).await.unwrap();
    node_b.scheduler.schedule(cleanup_every(150, 10)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(counter.peak(), 1);
    assert!(counter.runs() >= 1);

    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test]
async fn test_client_node_does_not_fire() {
    let cluster = Cluster::new();
    let counter = CountingHandler::new("cleanup", Duration::from_millis(5));
    let client = cluster.node(
        SchedulerConfig {
            role: NodeRole::Client,
            ..SchedulerConfig::default()
        },
        Vec::new(),
    );
    let worker = cluster.node(
        SchedulerConfig {
            role: NodeRole::Pusher,
            ..SchedulerConfig::default()
        },
        vec![counter.clone() as Arc<dyn TaskHandler>],
    );

    client.scheduler.schedule(cleanup_every(50, 5)).await.unwrap();
    worker.scheduler.schedule(cleanup_every(50, 5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(counter.runs(), 0);
    assert!(!client.scheduler.is_scheduled("cleanup").await.unwrap());
    client.stop().await;
    worker.stop().await;
}
