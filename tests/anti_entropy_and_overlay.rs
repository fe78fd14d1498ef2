#![forbid(unsafe_code)]

//! Cross-module scenarios exercised over real sockets: two full
//! `Context`s, each with its own wire server bound to an ephemeral
//! port, talking `ReqwestTransport` to each other.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use duskboard::config::Config;
use duskboard::context::Context;
use duskboard::core::record::Record;
use duskboard::driver;
use duskboard::networking::node::Node;
use duskboard::networking::wire_server;

/// Write a minimal config file pointing `data_dir` at a fresh tempdir and
/// forcing the thread cache's `get_range` to `0` so an empty cache's
/// first sync takes the open-ended `/get` path rather than `/head`.
fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let data_dir = dir.join("data");
    let toml = format!(
        "data_dir = \"{}\"\ndefault_timeout_secs = 1\nget_timeout_secs = 1\n\n[thread]\nget_range = 0\nsync_range = 10\nsave_removed = 0\n",
        data_dir.display()
    );
    let path = dir.join("config.toml");
    std::fs::write(&path, toml).unwrap();
    path
}

async fn spawn_node(dir: &std::path::Path) -> (Arc<Context>, Node, tokio::task::JoinHandle<()>) {
    let config = Config::load(&write_config(dir)).unwrap();
    let ctx = Context::bootstrap(config).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let node = Node::new(format!("127.0.0.1:{}", addr.port())).unwrap();
    ctx.nodes.set_myself(node.clone()).await;

    let app = wire_server::router(ctx.clone());
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
    });
    // Give the listener a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(20)).await;

    (ctx, node, handle)
}

#[tokio::test]
async fn bootstrap_join_then_search_then_anti_entropy_pulls_records() {
    let root = tempfile::tempdir().unwrap();
    let (ctx_a, node_a, _a_task) = spawn_node(&root.path().join("a")).await;
    let (ctx_b, node_b, _b_task) = spawn_node(&root.path().join("b")).await;

    // A publishes two records into a thread it carries locally.
    let cache_a = ctx_a.caches.get_or_create("thread_join").await.unwrap();
    let first = Record::build(1_000, &[("body", "hello")], None).unwrap();
    let second = Record::build(2_000, &[("body", "world")], None).unwrap();
    assert!(cache_a.add(&first, true).await.unwrap());
    assert!(cache_a.add(&second, true).await.unwrap());

    // B joins A directly (bypassing the general-list handshake retry
    // loop in `initialize`, which would also work but is slower here).
    assert!(ctx_b.nodes.join(node_a.clone()).await);
    assert!(ctx_b.nodes.has_node("", &node_a).await);

    // B must know about the thread locally before the driver will sync it.
    let cache_b = ctx_b.caches.get_or_create("thread_join").await.unwrap();
    assert_eq!(cache_b.info().await.count, 0);

    driver::run_once(&ctx_b, Duration::from_secs(5)).await;

    let info_b = cache_b.info().await;
    assert_eq!(info_b.count, 2);
    assert_eq!(info_b.valid_stamp, 2_000);
    assert!(ctx_b.nodes.has_node("thread_join", &node_a).await);

    let _ = node_b; // kept for symmetry / future assertions on B's own reachability
}

#[tokio::test]
async fn search_promotes_a_hit_and_demotes_a_miss() {
    let root = tempfile::tempdir().unwrap();
    let (ctx_a, node_a, _a_task) = spawn_node(&root.path().join("a")).await;
    let (ctx_b, node_b, _b_task) = spawn_node(&root.path().join("b")).await;
    let (_ctx_c, node_c, _c_task) = spawn_node(&root.path().join("c")).await;

    // A carries the thread, C does not.
    ctx_a.caches.get_or_create("thread_search").await.unwrap();
    ctx_b.nodes.append_to_table("", node_a.clone()).await;
    ctx_b.nodes.append_to_table("", node_c.clone()).await;

    let found = ctx_b.nodes.search("thread_search").await;
    assert_eq!(found, Some(node_a.clone()));
    assert!(ctx_b.nodes.has_node("thread_search", &node_a).await);
    assert!(!ctx_b.nodes.has_node("thread_search", &node_c).await);
}

#[tokio::test]
async fn general_node_list_is_capped_and_evicts_via_replace_in_list() {
    let root = tempfile::tempdir().unwrap();
    let (ctx_a, node_a, _a_task) = spawn_node(&root.path().join("a")).await;

    // Fill the thread table to its (default) share_nodes cap with
    // unreachable placeholder peers, then ask for one more: the oldest
    // entry should be evicted to make room.
    for i in 0..5 {
        let n = Node::new(format!("10.0.0.{i}:8000")).unwrap();
        ctx_a.nodes.append_to_table("thread_cap", n).await;
    }
    assert_eq!(ctx_a.nodes.table_len("thread_cap").await, 5);

    let oldest = Node::new("10.0.0.0:8000").unwrap();
    assert!(ctx_a.nodes.has_node("thread_cap", &oldest).await);

    let newcomer = Node::new("10.0.0.99:8000").unwrap();
    ctx_a.nodes.replace_in_list("thread_cap", newcomer.clone()).await;

    assert_eq!(ctx_a.nodes.table_len("thread_cap").await, 5);
    assert!(!ctx_a.nodes.has_node("thread_cap", &oldest).await);
    assert!(ctx_a.nodes.has_node("thread_cap", &newcomer).await);

    let _ = node_a;
}
