//! End-to-end dispatch loop tests over in-memory pipes.

use futures::FutureExt;
use meshcast_node::{
    Echo, GSetReplicator, NodeConfig, NodeConfigBuilder, NodeError, PNCounterReplicator, Payload,
    Runtime, Service,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

/// A runtime driven line by line from the test.
struct Harness {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    node: JoinHandle<meshcast_node::Result<()>>,
}

impl Harness {
    fn start<S: Service>(runtime: Runtime<S>) -> Self {
        let (input, node_input) = tokio::io::duplex(64 * 1024);
        let (node_output, output) = tokio::io::duplex(64 * 1024);
        let node = tokio::spawn(runtime.run(BufReader::new(node_input), node_output));
        Self {
            input,
            output: BufReader::new(output).lines(),
            node,
        }
    }

    async fn send(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    async fn send_json(&mut self, message: Value) {
        self.send(&message.to_string()).await;
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(2), self.output.next_line())
            .await
            .expect("timed out waiting for a reply")
            .unwrap()
            .expect("output closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Next line that is not anti-entropy gossip.
    async fn reply(&mut self) -> Value {
        loop {
            let line = self.recv().await;
            if line["body"]["type"] != "replicate" {
                return line;
            }
        }
    }

    async fn init(&mut self, id: &str, peers: &[&str]) {
        self.send_json(json!({
            "id": 0, "src": "c0", "dest": id,
            "body": {"type": "init", "msg_id": 1, "node_id": id, "node_ids": peers}
        }))
        .await;
        let reply = self.recv().await;
        assert_eq!(reply["body"]["type"], "init_ok");
    }

    /// Close the input and wait for the runtime's verdict.
    async fn finish(self) -> meshcast_node::Result<()> {
        drop(self.input);
        tokio::time::timeout(Duration::from_secs(2), self.node)
            .await
            .expect("runtime did not stop")
            .unwrap()
    }

    async fn outcome(self) -> meshcast_node::Result<()> {
        tokio::time::timeout(Duration::from_secs(2), self.node)
            .await
            .expect("runtime did not stop")
            .unwrap()
    }
}

fn lenient() -> NodeConfig {
    NodeConfigBuilder::new().strict(false).build()
}

#[tokio::test]
async fn test_counter_node_session() {
    let mut h = Harness::start(Runtime::new(PNCounterReplicator::default()));

    h.send(r#"{"id":0,"src":"c0","dest":"n1","body":{"type":"init","msg_id":1,"node_id":"n1","node_ids":["n1","n2"]}}"#)
        .await;
    assert_eq!(
        h.recv().await,
        json!({"src": "n1", "dest": "c0", "body": {"type": "init_ok", "msg_id": 0, "in_reply_to": 1}})
    );

    h.send(r#"{"id":1,"src":"c0","dest":"n1","body":{"type":"topology","msg_id":2,"topology":{"n1":["n2"],"n2":["n1"]}}}"#)
        .await;
    assert_eq!(h.reply().await["body"], json!({"type": "topology_ok", "msg_id": 0, "in_reply_to": 2}));

    h.send(r#"{"id":2,"src":"c1","dest":"n1","body":{"type":"add","msg_id":3,"delta":3}}"#)
        .await;
    assert_eq!(h.reply().await["body"], json!({"type": "add_ok", "msg_id": 0, "in_reply_to": 3}));

    h.send(r#"{"id":3,"src":"c1","dest":"n1","body":{"type":"read","msg_id":4}}"#)
        .await;
    assert_eq!(
        h.reply().await["body"],
        json!({"type": "read_ok", "msg_id": 0, "in_reply_to": 4, "value": 3})
    );

    assert_ok!(h.finish().await);
}

#[tokio::test]
async fn test_blank_lines_are_skipped() {
    let mut h = Harness::start(Runtime::new(Echo));
    h.send("").await;
    h.send("   ").await;
    h.init("n1", &["n1"]).await;

    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "echo", "echo": "hi", "msg_id": 2}}))
        .await;
    assert_eq!(h.recv().await["body"]["echo"], "hi");
    assert_ok!(h.finish().await);
}

#[tokio::test]
async fn test_end_of_input_is_clean_shutdown() {
    let h = Harness::start(Runtime::new(Echo));
    assert_ok!(h.finish().await);
}

#[tokio::test]
async fn test_malformed_line_stops_strict_node() {
    let mut h = Harness::start(Runtime::new(Echo));
    h.init("n1", &["n1"]).await;
    h.send("{this is not json").await;

    let err = assert_err!(h.outcome().await);
    assert!(matches!(err, NodeError::Decode { .. }));
}

#[tokio::test]
async fn test_unknown_type_stops_strict_node() {
    let mut h = Harness::start(Runtime::new(Echo));
    h.init("n1", &["n1"]).await;
    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "cas", "msg_id": 2}}))
        .await;

    let err = assert_err!(h.outcome().await);
    assert!(matches!(err, NodeError::NoHandler(kind) if kind == "cas"));
}

#[tokio::test]
async fn test_known_type_without_handler_stops_strict_node() {
    let mut h = Harness::start(Runtime::new(Echo));
    h.init("n1", &["n1"]).await;
    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "broadcast", "message": 1, "msg_id": 2}}))
        .await;

    let err = assert_err!(h.outcome().await);
    assert!(matches!(err, NodeError::NoHandler(kind) if kind == "broadcast"));
}

#[tokio::test]
async fn test_message_before_init_stops_strict_node() {
    let mut h = Harness::start(Runtime::new(Echo));
    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "echo", "echo": "early", "msg_id": 1}}))
        .await;

    let err = assert_err!(h.outcome().await);
    assert!(matches!(err, NodeError::NotInitialized(kind) if kind == "echo"));
}

#[tokio::test]
async fn test_unknown_type_before_init_is_named() {
    let mut h = Harness::start(Runtime::new(Echo));
    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "cas", "msg_id": 1}}))
        .await;

    let err = assert_err!(h.outcome().await);
    assert!(matches!(err, NodeError::NotInitialized(kind) if kind == "cas"));
}

#[tokio::test]
async fn test_peer_traffic_before_init_is_dropped() {
    let mut h = Harness::start(Runtime::new(PNCounterReplicator::default()));
    h.send_json(json!({"src": "n1", "dest": "n2", "body": {"type": "replicate", "msg_id": 0, "value": r#"{"inc":{"n1":4},"dec":{}}"#}}))
        .await;
    h.send_json(json!({"src": "n1", "dest": "n2", "body": {"type": "broadcast_ok", "msg_id": 0, "in_reply_to": 9}}))
        .await;
    h.init("n2", &["n1", "n2"]).await;

    h.send_json(json!({"src": "c1", "dest": "n2", "body": {"type": "add", "delta": 3, "msg_id": 2}}))
        .await;
    assert_eq!(h.reply().await["body"]["type"], "add_ok");
    h.send_json(json!({"src": "c1", "dest": "n2", "body": {"type": "read", "msg_id": 3}}))
        .await;
    assert_eq!(h.reply().await["body"]["value"], 3);

    assert_ok!(h.finish().await);
}

#[tokio::test]
async fn test_second_init_stops_strict_node() {
    let mut h = Harness::start(Runtime::new(Echo));
    h.init("n1", &["n1"]).await;
    h.send_json(json!({"src": "c0", "dest": "n1", "body": {"type": "init", "msg_id": 5, "node_id": "n7", "node_ids": ["n7"]}}))
        .await;

    let err = assert_err!(h.outcome().await);
    assert!(matches!(err, NodeError::AlreadyInitialized));
}

#[tokio::test]
async fn test_lenient_node_skips_bad_messages() {
    let mut h = Harness::start(Runtime::with_config(GSetReplicator::from_config(&lenient()), lenient()));
    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "read", "msg_id": 1}}))
        .await;
    h.init("n1", &["n1"]).await;
    h.send("{broken").await;
    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "cas", "msg_id": 2}}))
        .await;
    h.send_json(json!({"src": "n2", "dest": "n1", "body": {"type": "replicate", "value": "not a set"}}))
        .await;

    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "add", "element": "x", "msg_id": 3}}))
        .await;
    assert_eq!(h.recv().await["body"]["type"], "add_ok");
    h.send_json(json!({"src": "c1", "dest": "n1", "body": {"type": "read", "msg_id": 4}}))
        .await;
    assert_eq!(h.recv().await["body"]["value"], json!(["x"]));

    assert_ok!(h.finish().await);
}

#[tokio::test]
async fn test_undecodable_replicate_stops_strict_node() {
    let mut h = Harness::start(Runtime::new(GSetReplicator::default()));
    h.init("n1", &["n1", "n2"]).await;
    h.send_json(json!({"src": "n2", "dest": "n1", "body": {"type": "replicate", "value": "{\"n2\": 1}"}}))
        .await;

    let err = assert_err!(h.outcome().await);
    assert!(matches!(err, NodeError::Payload { kind: "replicate", .. }));
}

#[tokio::test]
async fn test_background_tasks_start_after_init() {
    let config = NodeConfigBuilder::new()
        .gossip_interval(Duration::from_millis(20))
        .build();
    let mut h = Harness::start(Runtime::with_config(PNCounterReplicator::from_config(&config), config));

    // Nothing is gossiped before the node knows its peers.
    let quiet = tokio::time::timeout(Duration::from_millis(100), h.output.next_line()).await;
    assert!(quiet.is_err());

    h.init("n1", &["n1", "n2"]).await;
    let line = h.recv().await;
    assert_eq!(line["dest"], "n2");
    assert_eq!(line["body"]["type"], "replicate");
    assert_eq!(line["body"]["value"], r#"{"inc":{},"dec":{}}"#);
}

#[tokio::test]
async fn test_extra_periodic_task_ticks_after_init() {
    let runtime = Runtime::new(Echo).every("heartbeat", Duration::from_millis(10), |node| {
        async move {
            node.send_request("n2", 0, Payload::Echo { echo: "tick".to_string() })
                .await
        }
        .boxed()
    });
    let mut h = Harness::start(runtime);
    h.init("n1", &["n1", "n2"]).await;

    for _ in 0..3 {
        let line = h.recv().await;
        assert_eq!(line["dest"], "n2");
        assert_eq!(line["body"]["echo"], "tick");
    }
    assert_ok!(h.finish().await);
}
