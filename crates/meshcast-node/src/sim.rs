//! In-process cluster for exercising nodes over unreliable links.
//!
//! Each node is a real [`Runtime`] reading and writing lines through memory
//! pipes. A router task per node reads what the node writes and forwards it:
//! lines addressed to another node may be dropped (random loss, or a
//! partition between the two), lines addressed to the client resolve the
//! matching pending [`Cluster::call`].

use crate::error::{NodeError, Result};
use crate::message::{Body, Payload, Reply, Request};
use crate::runtime::{Runtime, Service};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// The client id the cluster uses for its own requests.
pub const CLIENT: &str = "c1";

const PIPE_CAPACITY: usize = 1 << 20;

/// Link behaviour between nodes. Client traffic is never dropped.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Probability of dropping an inter-node line (0.0 - 1.0)
    pub loss_rate: f64,
    /// Seed for the loss decisions
    pub seed: u64,
    /// How long [`Cluster::call`] waits for a reply
    pub reply_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            seed: 12345,
            reply_timeout: Duration::from_secs(5),
        }
    }
}

impl NetworkConfig {
    /// Create a lossy network configuration
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }
}

/// Line counters for inter-node traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub delivered: u64,
    pub dropped: u64,
}

/// Neighbor graph shapes for [`Cluster::topology`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// n1 - n2 - ... - nN
    Line,
    /// A line whose ends are joined
    Ring,
    /// Everyone neighbors everyone
    Full,
}

struct Network {
    config: NetworkConfig,
    rng: Mutex<StdRng>,
    /// Unordered pairs that cannot reach each other.
    partitions: RwLock<HashSet<(String, String)>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Network {
    fn new(config: NetworkConfig) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            partitions: RwLock::new(HashSet::new()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn pair(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    fn admits(&self, src: &str, dest: &str) -> bool {
        let cut = self.partitions.read().contains(&Self::pair(src, dest));
        let lost = cut || self.rng.lock().gen::<f64>() < self.config.loss_rate;
        if lost {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        !lost
    }
}

type Inbox = Arc<tokio::sync::Mutex<DuplexStream>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

pub struct Cluster {
    ids: Vec<String>,
    inboxes: Arc<HashMap<String, Inbox>>,
    pending: Pending,
    next_msg_id: AtomicU64,
    network: Arc<Network>,
    tasks: Vec<JoinHandle<()>>,
}

impl Cluster {
    /// Start `size` nodes named `n1..nN`, built by `factory`, and initialize
    /// them with the full membership.
    pub async fn launch<S, F>(size: usize, config: NetworkConfig, mut factory: F) -> Result<Self>
    where
        S: Service,
        F: FnMut(&str) -> Runtime<S>,
    {
        let ids: Vec<String> = (1..=size).map(|i| format!("n{}", i)).collect();
        let network = Arc::new(Network::new(config));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let mut inboxes = HashMap::new();
        let mut outboxes = Vec::new();
        let mut tasks = Vec::new();

        for id in &ids {
            let (inbox, node_input) = tokio::io::duplex(PIPE_CAPACITY);
            let (node_output, outbox) = tokio::io::duplex(PIPE_CAPACITY);
            let runtime = factory(id);
            let name = id.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = runtime.run(BufReader::new(node_input), node_output).await {
                    warn!(node = %name, %err, "simulated node stopped");
                }
            }));
            inboxes.insert(id.clone(), Arc::new(tokio::sync::Mutex::new(inbox)));
            outboxes.push(outbox);
        }

        let inboxes = Arc::new(inboxes);
        for outbox in outboxes {
            let router = route(
                BufReader::new(outbox),
                Arc::clone(&inboxes),
                Arc::clone(&pending),
                Arc::clone(&network),
            );
            tasks.push(tokio::spawn(async move {
                if let Err(err) = router.await {
                    warn!(%err, "router stopped");
                }
            }));
        }

        let cluster = Self {
            ids,
            inboxes,
            pending,
            next_msg_id: AtomicU64::new(1),
            network,
            tasks,
        };
        for id in &cluster.ids {
            let init = Payload::Init {
                node_id: id.clone(),
                node_ids: cluster.ids.clone(),
            };
            cluster.call(id, init).await?;
        }
        Ok(cluster)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            delivered: self.network.delivered.load(Ordering::Relaxed),
            dropped: self.network.dropped.load(Ordering::Relaxed),
        }
    }

    /// Cut the link between `a` and `b` in both directions.
    pub fn partition(&self, a: &str, b: &str) {
        self.network.partitions.write().insert(Network::pair(a, b));
    }

    /// Restore every cut link.
    pub fn heal(&self) {
        self.network.partitions.write().clear();
    }

    /// The adjacency map for `shape` over this cluster's nodes.
    pub fn topology(&self, shape: Shape) -> HashMap<String, Vec<String>> {
        let n = self.ids.len();
        let mut topology: HashMap<String, Vec<String>> = HashMap::new();
        for (i, id) in self.ids.iter().enumerate() {
            let neighbors: Vec<String> = match shape {
                Shape::Full => self.ids.iter().filter(|other| *other != id).cloned().collect(),
                Shape::Line | Shape::Ring => {
                    let mut around = Vec::new();
                    if i > 0 {
                        around.push(self.ids[i - 1].clone());
                    } else if shape == Shape::Ring && n > 2 {
                        around.push(self.ids[n - 1].clone());
                    }
                    if i + 1 < n {
                        around.push(self.ids[i + 1].clone());
                    } else if shape == Shape::Ring && n > 2 {
                        around.push(self.ids[0].clone());
                    }
                    around
                }
            };
            topology.insert(id.clone(), neighbors);
        }
        topology
    }

    /// Send the same `topology` message to every node.
    pub async fn set_topology(&self, topology: HashMap<String, Vec<String>>) -> Result<()> {
        for id in &self.ids {
            let payload = Payload::Topology {
                topology: topology.clone(),
            };
            self.call(id, payload).await?;
        }
        Ok(())
    }

    /// Send a client request to `node` and wait for the reply body.
    pub async fn call(&self, node: &str, payload: Payload) -> Result<Body> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(msg_id, tx);

        let request = Request::new(CLIENT, node, Body::new(msg_id, payload));
        if let Err(err) = self.deliver(&request).await {
            self.pending.lock().remove(&msg_id);
            return Err(err);
        }

        let timeout = self.network.config.reply_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply.body),
            _ => {
                self.pending.lock().remove(&msg_id);
                Err(NodeError::NoReply {
                    node: node.to_string(),
                    timeout,
                })
            }
        }
    }

    /// `messages` of a broadcast node's `read_ok`.
    pub async fn read_messages(&self, node: &str) -> Result<Vec<Value>> {
        match self.call(node, Payload::Read).await?.payload {
            Payload::ReadOk { messages, .. } => Ok(messages.unwrap_or_default()),
            _ => Ok(Vec::new()),
        }
    }

    /// `value` of a CRDT node's `read_ok`.
    pub async fn read_value(&self, node: &str) -> Result<Value> {
        match self.call(node, Payload::Read).await?.payload {
            Payload::ReadOk { value, .. } => Ok(value.unwrap_or_default()),
            _ => Ok(Value::Null),
        }
    }

    async fn deliver(&self, request: &Request) -> Result<()> {
        let inbox = self.inboxes.get(&request.dest).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no node named {}", request.dest),
            )
        })?;
        let mut line = crate::message::encode(request)?;
        line.push('\n');
        inbox.lock().await.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn route(
    output: BufReader<DuplexStream>,
    inboxes: Arc<HashMap<String, Inbox>>,
    pending: Pending,
    network: Arc<Network>,
) -> Result<()> {
    let mut lines = output.lines();
    while let Some(mut line) = lines.next_line().await? {
        let envelope: Reply = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%line, %err, "unroutable line");
                continue;
            }
        };

        match inboxes.get(&envelope.dest) {
            Some(inbox) => {
                if !network.admits(&envelope.src, &envelope.dest) {
                    trace!(%line, "dropped");
                    continue;
                }
                line.push('\n');
                inbox.lock().await.write_all(line.as_bytes()).await?;
            }
            None => {
                let waiter = pending.lock().remove(&envelope.body.in_reply_to);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(envelope);
                }
            }
        }
    }
    Ok(())
}
