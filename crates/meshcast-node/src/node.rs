//! The handle every handler and background task talks to.
//!
//! A [`Node`] owns the identity assigned by `init`, the neighbor list from
//! `topology`, and the serialized output stream. It is cheap to clone; all
//! clones share the same state.

use crate::error::{NodeError, Result};
use crate::message::{encode, Body, Payload, Request};
use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Who this node is, as told by `init`. Set once, never changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub peer_ids: Vec<String>,
}

struct Inner {
    identity: OnceLock<Identity>,
    neighbors: RwLock<Vec<String>>,
    /// Whole lines only: holders write one line and flush before releasing.
    output: Mutex<Output>,
    faults: mpsc::UnboundedSender<NodeError>,
}

#[derive(Clone)]
pub struct Node {
    inner: Arc<Inner>,
}

impl Node {
    pub(crate) fn new<W>(output: W, faults: mpsc::UnboundedSender<NodeError>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                identity: OnceLock::new(),
                neighbors: RwLock::new(Vec::new()),
                output: Mutex::new(Box::new(output)),
                faults,
            }),
        }
    }

    /// This node's id, or the empty string before `init`.
    pub fn id(&self) -> &str {
        self.inner
            .identity
            .get()
            .map(|identity| identity.id.as_str())
            .unwrap_or_default()
    }

    /// Every node in the cluster, this one included.
    pub fn peer_ids(&self) -> &[String] {
        self.inner
            .identity
            .get()
            .map(|identity| identity.peer_ids.as_slice())
            .unwrap_or_default()
    }

    /// Every node in the cluster except this one.
    pub fn other_peers(&self) -> impl Iterator<Item = &String> {
        let me = self.id();
        self.peer_ids().iter().filter(move |peer| peer.as_str() != me)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.identity.get().is_some()
    }

    pub(crate) fn initialize(&self, id: String, peer_ids: Vec<String>) -> Result<()> {
        self.inner
            .identity
            .set(Identity { id, peer_ids })
            .map_err(|_| NodeError::AlreadyInitialized)
    }

    pub fn neighbors(&self) -> Vec<String> {
        self.inner.neighbors.read().clone()
    }

    pub(crate) fn set_neighbors(&self, neighbors: Vec<String>) {
        *self.inner.neighbors.write() = neighbors;
    }

    /// Encode `message` and write it as one line.
    pub async fn send<M: Serialize>(&self, message: &M) -> Result<()> {
        let mut line = encode(message)?;
        debug!(%line, "sending");
        line.push('\n');

        let mut output = self.inner.output.lock().await;
        output.write_all(line.as_bytes()).await?;
        output.flush().await?;
        Ok(())
    }

    /// Answer `request`, correlating through its `msg_id`.
    pub async fn reply(&self, request: &Request, payload: Payload) -> Result<()> {
        self.send(&request.reply(self.id(), payload)).await
    }

    /// Send a node-originated request to `dest`.
    pub async fn send_request(&self, dest: &str, msg_id: u64, payload: Payload) -> Result<()> {
        self.send(&Request::new(self.id(), dest, Body::new(msg_id, payload)))
            .await
    }

    /// Run `task` concurrently. A failure is reported to the dispatch loop,
    /// which decides whether it stops the node.
    pub fn spawn<F>(&self, what: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let faults = self.inner.faults.clone();
        tokio::spawn(async move {
            if let Err(err) = task.await {
                error!(%err, task = what, "task failed");
                let _ = faults.send(err);
            }
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Probe;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_identity_is_set_once() {
        let probe = Probe::new("n1", &["n1", "n2", "n3"], &[]);

        assert_eq!(probe.node.id(), "n1");
        assert_eq!(probe.node.other_peers().collect::<Vec<_>>(), vec!["n2", "n3"]);
        assert!(matches!(
            probe.node.initialize("n9".to_string(), vec![]),
            Err(NodeError::AlreadyInitialized)
        ));
        assert_eq!(probe.node.id(), "n1");
    }

    #[tokio::test]
    async fn test_reply_correlates_msg_id() {
        let mut probe = Probe::new("n1", &["n1"], &[]);
        let request = Request::decode(r#"{"src":"c1","dest":"n1","body":{"type":"read","msg_id":17}}"#).unwrap();

        probe.node.reply(&request, Payload::AddOk).await.unwrap();

        assert_eq!(
            probe.next().await,
            json!({"src": "n1", "dest": "c1", "body": {"type": "add_ok", "msg_id": 0, "in_reply_to": 17}})
        );
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let mut probe = Probe::new("n1", &["n1", "n2"], &[]);
        let long = "x".repeat(4096);

        let mut handles = Vec::new();
        for i in 0..16 {
            let node = probe.node.clone();
            let echo = format!("{}-{}", i, long);
            handles.push(tokio::spawn(async move {
                node.send_request("n2", i, Payload::Echo { echo }).await
            }));
        }

        let mut seen = Vec::new();
        for _ in 0..16 {
            let line = probe.next().await;
            seen.push(line["body"]["msg_id"].as_u64().unwrap());
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_spawned_failure_reaches_fault_channel() {
        let mut probe = Probe::new("n1", &["n1"], &[]);

        probe
            .node
            .spawn("failing", async { Err(NodeError::NoHandler("cas".to_string())) })
            .await
            .unwrap();

        assert!(matches!(probe.faults.recv().await, Some(NodeError::NoHandler(_))));
    }
}
