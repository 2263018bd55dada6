//! # meshcast-node
//!
//! A runtime for nodes that talk newline-delimited JSON over standard input
//! and output, and the node kinds built on it:
//!
//! - [`Echo`]: answers `echo` with the same text
//! - [`Broadcaster`]: gossip broadcast with retry-until-ack relays
//! - [`Replicator`]: hosts a CRDT and pushes its full state to every peer
//!   on a fixed interval
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshcast_node::{GCounterReplicator, NodeConfig, Runtime};
//!
//! #[tokio::main]
//! async fn main() -> meshcast_node::Result<()> {
//!     let config = NodeConfig::default();
//!     Runtime::with_config(GCounterReplicator::from_config(&config), config)
//!         .run_stdio()
//!         .await
//! }
//! ```
//!
//! [`sim::Cluster`] runs several nodes in one process over links that can
//! drop messages, for tests and soak runs.

pub mod broadcast;
pub mod config;
pub mod echo;
pub mod error;
pub mod message;
pub mod node;
pub mod replication;
pub mod runtime;
pub mod sim;

pub use broadcast::{BroadcastConfig, Broadcaster};
pub use config::{NodeConfig, NodeConfigBuilder};
pub use echo::Echo;
pub use error::{NodeError, Result};
pub use message::{Body, Payload, Reply, Request};
pub use node::Node;
pub use replication::{GCounterReplicator, GSetReplicator, PNCounterReplicator, Replicator};
pub use runtime::{PeriodicTask, Runtime, Service};
