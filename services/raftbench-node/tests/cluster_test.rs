//! Two nodes on loopback: the follower joins over HTTP and releases the
//! leader's benchmark.

use raftbench_core::{BenchConfig, Consensus};
use raftbench_node::{build_router, Node, NodeError, NodeMode};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

fn node_config(dir: &TempDir, port: u16, join: Option<String>) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.node.host = "127.0.0.1".to_string();
    config.node.port = port;
    config.node.join = join;
    config.node.data_dir = dir.path().join("node");
    config.bench.txns = 20;
    config.bench.txn_size = 8;
    config.bench.peers = 2;
    config
}

#[tokio::test]
async fn test_follower_join_starts_leader_benchmark() {
    let leader_dir = TempDir::new().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let leader_addr = listener.local_addr().unwrap();

    let mut leader = Node::prepare(node_config(&leader_dir, leader_addr.port(), None))
        .await
        .unwrap();
    assert_eq!(leader.mode(), &NodeMode::Bootstrap);
    assert_eq!(leader.consensus().member_count(), 1);
    assert!(!leader.gate().is_released());

    let benchmark = leader.spawn_benchmark().expect("bootstrap node runs the benchmark");
    assert!(leader.spawn_benchmark().is_none());

    let app = build_router(leader.app_state());
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let follower_dir = TempDir::new().unwrap();
    let mut follower = Node::prepare(node_config(
        &follower_dir,
        4999,
        Some(leader_addr.to_string()),
    ))
    .await
    .unwrap();
    assert!(matches!(follower.mode(), NodeMode::Join { .. }));
    assert!(follower.spawn_benchmark().is_none());

    let report = tokio::time::timeout(Duration::from_secs(10), benchmark)
        .await
        .expect("benchmark finished")
        .unwrap()
        .unwrap();

    assert_eq!(report.issued, 20);
    assert_eq!(report.committed, 20);
    assert_eq!(leader.db().stats().write_count, 20);
    assert_eq!(leader.consensus().member_count(), 2);
    assert!(leader.gate().is_released());

    server.abort();
}

#[tokio::test]
async fn test_restart_recovers_without_benchmark() {
    let dir = TempDir::new().unwrap();
    let mut config = node_config(&dir, 4998, None);
    config.bench.peers = 1;

    let mut first = Node::prepare(config.clone()).await.unwrap();
    let report = first.spawn_benchmark().unwrap().await.unwrap().unwrap();
    assert_eq!(report.committed, 20);
    drop(first);

    let mut second = Node::prepare(config).await.unwrap();
    assert_eq!(second.mode(), &NodeMode::Recover);
    assert_eq!(second.consensus().commit_index(), 20);
    assert!(second.spawn_benchmark().is_none());
}

#[tokio::test]
async fn test_join_to_unreachable_leader_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = node_config(&dir, 4997, Some("127.0.0.1:1".to_string()));

    let err = Node::prepare(config).await.err().expect("join must fail");
    assert!(matches!(err, NodeError::Join { .. }));
}

#[tokio::test]
async fn test_prefill_sizes_store_from_footprint() {
    let dir = TempDir::new().unwrap();
    let mut config = node_config(&dir, 4996, None);
    config.bench.txn_size = 64;
    config.perf.memory_footprint_bytes = 64 * 100;

    let node = Node::prepare(config).await.unwrap();
    assert_eq!(node.db().len(), 100);
    assert_eq!(node.db().get(7).len(), 64);
}
