//! CRDT hosting and full-state anti-entropy.
//!
//! A [`Replicator`] owns one replicated value for the lifetime of the
//! process. Local `add`s go to this node's own slot, `read` returns the
//! current value, and every `gossip_interval` the whole state is pushed to
//! every other node as a `replicate` message. Receivers merge, so lost or
//! repeated rounds only delay convergence.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::message::{encode, Payload, Request};
use crate::node::Node;
use crate::runtime::{PeriodicTask, Service};
use async_trait::async_trait;
use futures::FutureExt;
use meshcast_core::{Element, GCounter, GSet, PNCounter, Replicated};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

pub type GSetReplicator = Replicator<GSet<Element>>;
pub type GCounterReplicator = Replicator<GCounter<String>>;
pub type PNCounterReplicator = Replicator<PNCounter<String>>;

pub struct Replicator<C: Replicated> {
    /// Guarded on its own; never held while the node writes output.
    crdt: Mutex<C>,
    gossip_interval: Duration,
}

impl<C: Replicated> Replicator<C> {
    pub fn new(gossip_interval: Duration) -> Self {
        Self {
            crdt: Mutex::new(C::bottom()),
            gossip_interval,
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(config.gossip_interval)
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> C {
        self.crdt.lock().clone()
    }

    pub fn read(&self) -> C::Output {
        self.crdt.lock().read()
    }

    pub fn add(&self, source: &str, delta: C::Delta) {
        self.crdt.lock().add(source, delta);
    }

    /// Merge a peer's serialized snapshot.
    pub fn merge_encoded(&self, snapshot: &str) -> Result<()> {
        let incoming: C = serde_json::from_str(snapshot).map_err(|source| NodeError::Payload {
            kind: "replicate",
            source,
        })?;
        self.crdt.lock().merge(&incoming);
        Ok(())
    }

    /// Push the full local state to every other node.
    pub async fn gossip(&self, node: &Node) -> Result<()> {
        let value = encode(&self.snapshot())?;
        trace!(%value, "anti-entropy round");
        for peer in node.other_peers() {
            node.send_request(peer, 0, Payload::Replicate { value: value.clone() })
                .await?;
        }
        Ok(())
    }
}

impl<C: Replicated> Default for Replicator<C> {
    fn default() -> Self {
        Self::from_config(&NodeConfig::default())
    }
}

#[async_trait]
impl<C> Service for Replicator<C>
where
    C: Replicated,
    C::Delta: Send,
    C::Output: Send,
{
    fn handles(&self, kind: &str) -> bool {
        matches!(kind, "add" | "read" | "replicate")
    }

    async fn handle(self: Arc<Self>, node: Node, request: Request) -> Result<()> {
        match &request.body.payload {
            Payload::Add { delta } => {
                let delta: C::Delta = serde_json::from_value(delta.clone())
                    .map_err(|source| NodeError::Payload { kind: "add", source })?;
                self.add(node.id(), delta);
                node.reply(&request, Payload::AddOk).await
            }
            Payload::Read => {
                let value = serde_json::to_value(self.read()).map_err(NodeError::Encode)?;
                node.reply(&request, Payload::ReadOk { value: Some(value), messages: None })
                    .await
            }
            Payload::Replicate { value } => {
                debug!(src = %request.src, "merging peer state");
                self.merge_encoded(value)
            }
            other => {
                debug!(kind = other.kind(), "not a replication message");
                Ok(())
            }
        }
    }

    fn background(self: Arc<Self>) -> Vec<PeriodicTask> {
        let interval = self.gossip_interval;
        vec![PeriodicTask::new("anti-entropy", interval, move |node| {
            let this = Arc::clone(&self);
            async move { this.gossip(&node).await }.boxed()
        })]
    }
}
