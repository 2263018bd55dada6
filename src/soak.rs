use async_stream::stream;
use clap::Args;
use futures::stream::{Stream, StreamExt};
use meshcast_core::{Element, GSet};
use meshcast_node::sim::{Cluster, NetworkConfig, NetworkStats, Shape};
use meshcast_node::{BroadcastConfig, Broadcaster, NodeConfig, Payload, Result, Runtime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Args, Debug)]
pub struct SoakArgs {
    /// Cluster size
    #[arg(long, default_value_t = 5, value_parser = cluster_size)]
    pub nodes: usize,

    /// Distinct values to broadcast
    #[arg(long, default_value_t = 100)]
    pub values: usize,

    /// Probability of dropping a node-to-node message
    #[arg(long, default_value_t = 0.1)]
    pub loss: f64,

    /// Seed for value placement and message loss
    #[arg(long, default_value_t = 12345)]
    pub seed: u64,

    /// Give up waiting for every node to see every value after this long
    #[arg(long, default_value_t = 60)]
    pub deadline_secs: u64,
}

fn cluster_size(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("a cluster needs at least one node".to_string()),
        Ok(n) => Ok(n),
        Err(err) => Err(err.to_string()),
    }
}

/// Statistics collected during a soak run
#[derive(Clone, Debug)]
pub struct SoakStats {
    pub nodes: usize,
    pub values: usize,
    pub loss_rate: f64,
    pub broadcast_time: Duration,
    pub converge_time: Duration,
    pub converged: bool,
    pub network: NetworkStats,
}

impl SoakStats {
    pub fn print(&self) {
        let drop_share = if self.network.delivered + self.network.dropped == 0 {
            0.0
        } else {
            self.network.dropped as f64 / (self.network.delivered + self.network.dropped) as f64
        };

        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Soak Run Statistics                           ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Nodes:                     {:>30} ║", self.nodes);
        println!("║  Values Broadcast:          {:>30} ║", self.values);
        println!("║  Configured Loss:           {:>29}% ║", format!("{:.1}", self.loss_rate * 100.0));
        println!("║  Broadcast Time:            {:>29}s ║", format!("{:.3}", self.broadcast_time.as_secs_f64()));
        println!("║  Time To Convergence:       {:>29}s ║", format!("{:.3}", self.converge_time.as_secs_f64()));
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "no" });
        println!("║  Lines Delivered:           {:>30} ║", self.network.delivered);
        println!("║  Lines Dropped:             {:>30} ║", self.network.dropped);
        println!("║  Observed Loss:             {:>29}% ║", format!("{:.1}", drop_share * 100.0));
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// Yields `(node index, value)`: every value once, each at a random node.
fn value_generator(nodes: usize, values: usize, seed: u64) -> impl Stream<Item = (usize, u64)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for value in 0..values as u64 {
            yield (rng.gen_range(0..nodes), value);
        }
    }
}

/// Whether every node reads exactly `values` distinct values.
async fn all_converged(cluster: &Cluster, values: usize) -> Result<bool> {
    for id in cluster.ids() {
        let seen: GSet<Element> = cluster
            .read_messages(id)
            .await?
            .into_iter()
            .map(Element::from)
            .collect();
        if seen.len() < values {
            return Ok(false);
        }
    }
    Ok(true)
}

pub async fn soak(args: &SoakArgs, config: &NodeConfig) -> Result<SoakStats> {
    let network = NetworkConfig {
        loss_rate: args.loss,
        seed: args.seed,
        ..Default::default()
    };
    let cluster = Cluster::launch(args.nodes, network, |_| {
        Runtime::with_config(Broadcaster::new(BroadcastConfig::from(config)), config.clone())
    })
    .await?;
    cluster.set_topology(cluster.topology(Shape::Ring)).await?;

    println!("\n[Phase 1/2] Broadcasting values...");
    let start = Instant::now();
    let mut placements = Box::pin(value_generator(args.nodes, args.values, args.seed));
    while let Some((index, value)) = placements.next().await {
        let node = &cluster.ids()[index];
        cluster
            .call(node, Payload::Broadcast { message: Some(json!(value)) })
            .await?;
    }
    let broadcast_time = start.elapsed();
    println!("[Phase 1/2] ✓ Completed");

    println!("[Phase 2/2] Waiting for every node to see every value...");
    let deadline = start + Duration::from_secs(args.deadline_secs);
    let converged = loop {
        if all_converged(&cluster, args.values).await? {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    let converge_time = start.elapsed();
    if converged {
        println!("[Phase 2/2] ✓ Completed");
    } else {
        warn!(deadline_secs = args.deadline_secs, "cluster did not converge");
    }

    Ok(SoakStats {
        nodes: args.nodes,
        values: args.values,
        loss_rate: args.loss,
        broadcast_time,
        converge_time,
        converged,
        network: cluster.stats(),
    })
}

pub async fn run(args: SoakArgs, config: NodeConfig) -> Result<()> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Broadcast Soak Run (Ring Topology)                  ║");
    println!("║  Nodes: {} | Values: {} | Loss: {:.2}", args.nodes, args.values, args.loss);
    println!("╚════════════════════════════════════════════════════════════╝");
    info!(?config, "starting soak run");

    let stats = soak(&args, &config).await?;
    stats.print();
    Ok(())
}
