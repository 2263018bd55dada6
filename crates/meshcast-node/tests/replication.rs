//! CRDT convergence through anti-entropy over simulated links.

use meshcast_core::{Element, GCounter, GSet, PNCounter, Replicated};
use meshcast_node::sim::{Cluster, NetworkConfig};
use meshcast_node::{NodeConfig, NodeConfigBuilder, Payload, Replicator, Runtime};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_test::assert_ok;

fn gossip_fast() -> NodeConfig {
    NodeConfigBuilder::new()
        .gossip_interval(Duration::from_millis(25))
        .build()
}

fn replicator<C>(_id: &str) -> Runtime<Replicator<C>>
where
    C: Replicated,
    C::Delta: Send,
    C::Output: Send,
{
    let config = gossip_fast();
    Runtime::with_config(Replicator::from_config(&config), config)
}

async fn add(cluster: &Cluster, node: &str, delta: Value) {
    let body = assert_ok!(cluster.call(node, Payload::Add { delta }).await);
    assert_eq!(body.payload, Payload::AddOk);
}

async fn wait_for_value(cluster: &Cluster, expected: Value, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let mut values = Vec::new();
        for id in cluster.ids() {
            values.push(assert_ok!(cluster.read_value(id).await));
        }
        if values.iter().all(|value| *value == expected) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected every node to read {}, got {:?}",
            expected,
            values
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pn_counter_converges_on_documented_sum() {
    let cluster = assert_ok!(
        Cluster::launch(3, NetworkConfig::default(), replicator::<PNCounter<String>>).await
    );

    add(&cluster, "n1", json!(5)).await;
    add(&cluster, "n2", json!(3)).await;
    add(&cluster, "n3", json!(-2)).await;

    wait_for_value(&cluster, json!(6), Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_g_counter_converges_under_loss() {
    let network = NetworkConfig {
        loss_rate: 0.5,
        seed: 3,
        ..Default::default()
    };
    let cluster = assert_ok!(Cluster::launch(4, network, replicator::<GCounter<String>>).await);

    for (i, id) in ["n1", "n2", "n3", "n4", "n1"].iter().enumerate() {
        add(&cluster, id, json!(i + 1)).await;
    }

    wait_for_value(&cluster, json!(15), Duration::from_secs(10)).await;
    assert!(cluster.stats().dropped > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_g_set_heals_after_partition() {
    let cluster = assert_ok!(Cluster::launch(3, NetworkConfig::default(), replicator::<GSet<Element>>).await);
    cluster.partition("n1", "n2");
    cluster.partition("n1", "n3");

    add(&cluster, "n1", json!("isolated")).await;
    add(&cluster, "n2", json!("b")).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(assert_ok!(cluster.read_value("n1").await), json!(["isolated"]));
    assert_eq!(assert_ok!(cluster.read_value("n3").await), json!(["b"]));

    cluster.heal();
    wait_for_value(&cluster, json!(["b", "isolated"]), Duration::from_secs(5)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pn_counter_can_go_negative() {
    let cluster = assert_ok!(Cluster::launch(2, NetworkConfig::default(), replicator::<PNCounter<String>>).await);

    add(&cluster, "n1", json!(-7)).await;
    add(&cluster, "n2", json!(2)).await;

    wait_for_value(&cluster, json!(-5), Duration::from_secs(5)).await;
}
