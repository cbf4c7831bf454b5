#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Concurrent senders sharing one connection, and concurrent dialers
//! against one node. Frames must never interleave on the wire.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerlink::{Connection, Message, Node, NodeConfig, NodeHandler};
use tokio::task::JoinSet;

#[derive(Default)]
struct Collector {
    messages: Mutex<Vec<Message>>,
    inbound: Mutex<HashSet<String>>,
}

impl NodeHandler for Collector {
    fn on_inbound_connect(&self, conn: &Connection) {
        self.inbound.lock().unwrap().insert(conn.id().to_string());
    }

    fn on_message(&self, _conn: &Connection, message: Message) {
        self.messages.lock().unwrap().push(message);
    }
}

fn fast_config(id: &str) -> NodeConfig {
    NodeConfig::default_with_overrides(|config| {
        config.node.port = 0;
        config.node.id = Some(id.into());
        config.node.poll_interval = Duration::from_millis(50);
    })
}

async fn wait_for<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_sends_on_one_connection_stay_framed() {
    let collector = Arc::new(Collector::default());
    let receiver = Node::with_config(fast_config("RECVR"), collector.clone()).await.unwrap();
    receiver.start().unwrap();

    let sender = Node::with_config(fast_config("SENDR"), Arc::new(Collector::default()))
        .await
        .unwrap();
    sender.start().unwrap();

    let conn = sender
        .connect_to("127.0.0.1", receiver.port())
        .await
        .unwrap()
        .into_connection();

    let tasks_count = 8usize;
    let per_task = 200usize;
    let mut tasks = JoinSet::new();
    for task in 0..tasks_count {
        let sender = sender.clone();
        let conn = conn.clone();
        tasks.spawn(async move {
            for seq in 0..per_task {
                let body = format!("task{task}-seq{seq}-{}", "x".repeat(seq % 97));
                sender.send_to(&conn, body).await.unwrap();
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let expected = tasks_count * per_task;
    wait_for(|| collector.messages.lock().unwrap().len() == expected).await;

    let messages = collector.messages.lock().unwrap().clone();
    let mut seen = HashSet::new();
    for message in messages {
        let text = message.as_text().expect("text frame").to_string();
        assert!(text.starts_with("task"), "corrupted frame: {text:?}");
        assert!(seen.insert(text), "duplicate frame");
    }
    assert_eq!(seen.len(), expected);

    sender.stop().await;
    receiver.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn many_peers_dial_one_node() {
    let collector = Arc::new(Collector::default());
    let hub = Node::with_config(fast_config("HUBXX"), collector.clone()).await.unwrap();
    hub.start().unwrap();

    let peers_count = 16usize;
    let mut peers = Vec::new();
    let mut tasks = JoinSet::new();
    for i in 0..peers_count {
        let peer = Node::with_config(fast_config(&format!("P{i:04}")), Arc::new(Collector::default()))
            .await
            .unwrap();
        peer.start().unwrap();
        peers.push(peer.clone());

        let port = hub.port();
        tasks.spawn(async move {
            peer.connect_to("127.0.0.1", port).await.unwrap();
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    wait_for(|| collector.inbound.lock().unwrap().len() == peers_count).await;
    assert_eq!(hub.inbound().await.len(), peers_count);

    let delivered = hub.broadcast("fan-out", &[]).await;
    assert_eq!(delivered, peers_count);

    hub.stop().await;
    assert_eq!(hub.metrics().connections_active, 0);

    for peer in &peers {
        peer.stop().await;
    }
}
