//! The dispatch loop.
//!
//! The runtime reads one line at a time, decodes it and hands it to the
//! hosted [`Service`]. It has two phases:
//!
//! - **uninitialized**: only `init` is accepted; it sets the node identity,
//!   replies `init_ok` and starts the background tasks. Early peer gossip
//!   is dropped.
//! - **running**: `topology` is handled here for every node kind, everything
//!   else is routed to the service and runs as its own task, so a slow
//!   handler never holds up the next line.
//!
//! Handler and background failures flow back into the loop, which is the
//! single place deciding whether an error stops the node.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::message::{wire_type, Payload, Request};
use crate::node::Node;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A node kind: the message types it answers and how.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Whether `kind` (the wire `type`) is routed to this service.
    fn handles(&self, kind: &str) -> bool;

    async fn handle(self: Arc<Self>, node: Node, request: Request) -> Result<()>;

    /// Tasks to start once the node is initialized.
    fn background(self: Arc<Self>) -> Vec<PeriodicTask> {
        Vec::new()
    }
}

type Tick = Arc<dyn Fn(Node) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A function run forever at a fixed interval: tick, sleep, tick, ...
#[derive(Clone)]
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    tick: Tick,
}

impl PeriodicTask {
    pub fn new<F>(name: &'static str, interval: Duration, tick: F) -> Self
    where
        F: Fn(Node) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            name,
            interval,
            tick: Arc::new(tick),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn start(self, node: &Node) {
        info!(task = self.name, interval = ?self.interval, "starting periodic task");
        node.spawn(self.name, self.run_forever(node.clone()));
    }

    async fn run_forever(self, node: Node) -> Result<()> {
        loop {
            (self.tick)(node.clone()).await?;
            tokio::time::sleep(self.interval).await;
        }
    }
}

pub struct Runtime<S: Service> {
    service: Arc<S>,
    config: NodeConfig,
    tasks: Vec<PeriodicTask>,
}

impl<S: Service> Runtime<S> {
    pub fn new(service: S) -> Self {
        Self::with_config(service, NodeConfig::default())
    }

    pub fn with_config(service: S, config: NodeConfig) -> Self {
        let service = Arc::new(service);
        let tasks = Arc::clone(&service).background();
        Self {
            service,
            config,
            tasks,
        }
    }

    /// Register an extra background task, started after `init`.
    pub fn every<F>(mut self, name: &'static str, interval: Duration, tick: F) -> Self
    where
        F: Fn(Node) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.tasks.push(PeriodicTask::new(name, interval, tick));
        self
    }

    /// Serve the harness on standard input and output.
    pub async fn run_stdio(self) -> Result<()> {
        self.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve until the input ends (`Ok`) or a fatal error occurs (`Err`).
    pub async fn run<R, W>(self, input: R, output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (faults_tx, mut faults) = mpsc::unbounded_channel();
        let node = Node::new(output, faults_tx);
        let mut tasks = Some(self.tasks.clone());
        let mut lines = input.lines();

        loop {
            let line = tokio::select! {
                biased;
                Some(err) = faults.recv() => {
                    self.escalate(err)?;
                    continue;
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                info!("input closed, shutting down");
                return Ok(());
            };
            if line.trim().is_empty() {
                debug!("skipping blank line");
                continue;
            }
            debug!(%line, "received");

            let request = match Request::decode(&line) {
                Ok(request) => request,
                Err(err) => {
                    self.escalate(err)?;
                    continue;
                }
            };

            if let Err(err) = self.dispatch(&node, request, &line, &mut tasks).await {
                self.escalate(err)?;
            }
        }
    }

    async fn dispatch(
        &self,
        node: &Node,
        request: Request,
        line: &str,
        tasks: &mut Option<Vec<PeriodicTask>>,
    ) -> Result<()> {
        let kind = request.body.kind();
        // Types this build does not know are reported by their wire name.
        let name = || match request.body.payload {
            Payload::Unknown => wire_type(line).unwrap_or_else(|| kind.to_string()),
            _ => kind.to_string(),
        };

        if let Payload::Init { node_id, node_ids } = &request.body.payload {
            node.initialize(node_id.clone(), node_ids.clone())?;
            node.reply(&request, Payload::InitOk).await?;
            info!(id = node.id(), peers = ?node.peer_ids(), "node initialized");
            for task in tasks.take().into_iter().flatten() {
                task.start(node);
            }
            return Ok(());
        }
        if !node.is_initialized() {
            // Peers may start gossiping before our own init arrives.
            if matches!(
                request.body.payload,
                Payload::Replicate { .. } | Payload::BroadcastOk
            ) {
                warn!(src = %request.src, kind, "peer message before init, dropping");
                return Ok(());
            }
            return Err(NodeError::NotInitialized(name()));
        }
        if let Payload::Topology { topology } = &request.body.payload {
            let neighbors = topology.get(node.id()).cloned().unwrap_or_default();
            info!(?neighbors, "topology received");
            node.set_neighbors(neighbors);
            return node.reply(&request, Payload::TopologyOk).await;
        }
        if !self.service.handles(kind) {
            return Err(NodeError::NoHandler(name()));
        }

        let service = Arc::clone(&self.service);
        node.spawn(kind, service.handle(node.clone(), request));
        Ok(())
    }

    fn escalate(&self, err: NodeError) -> Result<()> {
        if err.is_fatal(self.config.strict) {
            return Err(err);
        }
        warn!(%err, "skipping bad message");
        Ok(())
    }
}
