//! # meshcast
//!
//! Runs one node kind on standard input and output, or a soak run of a whole
//! broadcast cluster in process.
//!
//! ```text
//! meshcast broadcast                     # serve a broadcast node
//! meshcast --gossip-interval-ms 200 pn-counter
//! meshcast soak --nodes 5 --values 200 --loss 0.2
//! ```
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); stdout carries protocol
//! lines only.

use clap::{Args, Parser, Subcommand};
use meshcast_node::{
    BroadcastConfig, Broadcaster, Echo, GCounterReplicator, GSetReplicator, NodeConfig,
    NodeConfigBuilder, PNCounterReplicator, Result, Runtime, Service,
};
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

pub mod soak;

#[derive(Parser)]
#[command(name = "meshcast")]
#[command(about = "Gossip broadcast and CRDT nodes over line-delimited JSON")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Tuning {
    /// Pause between resends of an unacknowledged relay
    #[arg(long, global = true, env = "MESHCAST_RETRY_INTERVAL_MS", default_value_t = 1000)]
    retry_interval_ms: u64,

    /// Give up on a relay after this many sends (default: never)
    #[arg(long, global = true, env = "MESHCAST_MAX_RELAY_ATTEMPTS")]
    max_relay_attempts: Option<u32>,

    /// Pause between full-state anti-entropy rounds
    #[arg(long, global = true, env = "MESHCAST_GOSSIP_INTERVAL_MS", default_value_t = 1000)]
    gossip_interval_ms: u64,

    /// Log and skip malformed or unroutable messages instead of exiting
    #[arg(long, global = true, env = "MESHCAST_LENIENT")]
    lenient: bool,
}

impl Tuning {
    fn node_config(&self) -> NodeConfig {
        NodeConfigBuilder::new()
            .strict(!self.lenient)
            .retry_interval(Duration::from_millis(self.retry_interval_ms))
            .max_relay_attempts(self.max_relay_attempts)
            .gossip_interval(Duration::from_millis(self.gossip_interval_ms))
            .build()
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Answer every echo with the same text
    Echo,
    /// Gossip broadcast with retry-until-ack relays
    Broadcast,
    /// Grow-only set replicated by anti-entropy
    GSet,
    /// Grow-only counter replicated by anti-entropy
    GCounter,
    /// Increment/decrement counter replicated by anti-entropy
    PnCounter,
    /// Run a broadcast cluster in process over lossy links
    Soak(soak::SoakArgs),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.tuning.node_config();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            error!(%err, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };
    let outcome = rt.block_on(run(cli.command, config));
    // Relays, gossip rounds and the stdin reader never finish on their own.
    rt.shutdown_background();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "node stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: NodeConfig) -> Result<()> {
    match command {
        Commands::Echo => serve(Echo, config).await,
        Commands::Broadcast => serve(Broadcaster::new(BroadcastConfig::from(&config)), config).await,
        Commands::GSet => serve(GSetReplicator::from_config(&config), config).await,
        Commands::GCounter => serve(GCounterReplicator::from_config(&config), config).await,
        Commands::PnCounter => serve(PNCounterReplicator::from_config(&config), config).await,
        Commands::Soak(args) => soak::run(args, config).await,
    }
}

async fn serve<S: Service>(service: S, config: NodeConfig) -> Result<()> {
    Runtime::with_config(service, config).run_stdio().await
}
