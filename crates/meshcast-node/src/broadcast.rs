//! Reliable gossip broadcast.
//!
//! Every value is acknowledged on receipt, recorded in a grow-only `seen`
//! set, and relayed once to each neighbor except the one it came from. A
//! relay keeps resending the same request (same `msg_id`) until the matching
//! `broadcast_ok` clears it from the in-flight table, which gives
//! at-least-once delivery over links that drop messages.
//!
//! Each relay is its own task, so a partitioned neighbor only stalls the
//! relays addressed to it.

use crate::config::NodeConfig;
use crate::error::Result;
use crate::message::{Payload, Request};
use crate::node::Node;
use crate::runtime::Service;
use async_trait::async_trait;
use meshcast_core::{Element, GSet};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// An outbound relay still waiting for its `broadcast_ok`.
#[derive(Clone, Debug, PartialEq)]
pub struct InFlight {
    pub dest: String,
    pub message: Element,
}

#[derive(Default)]
struct Relays {
    seen: GSet<Element>,
    in_flight: HashMap<u64, InFlight>,
    next_msg_id: u64,
}

/// Configuration for relaying.
#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    pub retry_interval: Duration,
    pub max_attempts: Option<u32>,
}

impl From<&NodeConfig> for BroadcastConfig {
    fn from(config: &NodeConfig) -> Self {
        Self {
            retry_interval: config.retry_interval,
            max_attempts: config.max_relay_attempts,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self::from(&NodeConfig::default())
    }
}

pub struct Broadcaster {
    config: BroadcastConfig,
    relays: Mutex<Relays>,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            relays: Mutex::new(Relays::default()),
        }
    }

    /// Every value observed so far, in element order.
    pub fn seen(&self) -> Vec<Value> {
        self.relays
            .lock()
            .seen
            .iter()
            .map(|e| e.as_value().clone())
            .collect()
    }

    /// Ids of relays that have not been acknowledged yet.
    pub fn in_flight(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.relays.lock().in_flight.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Record `message`. When it is new, also register one in-flight relay per
    /// target and return `(target, msg_id)` pairs; otherwise return nothing.
    fn admit(&self, message: &Element, targets: Vec<String>) -> Vec<(String, u64)> {
        let mut relays = self.relays.lock();
        if !relays.seen.insert(message.clone()) {
            return Vec::new();
        }

        targets
            .into_iter()
            .map(|dest| {
                relays.next_msg_id += 1;
                let msg_id = relays.next_msg_id;
                relays.in_flight.insert(
                    msg_id,
                    InFlight {
                        dest: dest.clone(),
                        message: message.clone(),
                    },
                );
                (dest, msg_id)
            })
            .collect()
    }

    /// Clear the relay acknowledged by `msg_id`. Returns `false` for ids that
    /// are unknown or already cleared.
    pub fn acknowledge(&self, msg_id: u64) -> bool {
        self.relays.lock().in_flight.remove(&msg_id).is_some()
    }

    fn is_pending(&self, msg_id: u64) -> bool {
        self.relays.lock().in_flight.contains_key(&msg_id)
    }

    async fn on_broadcast(self: Arc<Self>, node: Node, request: &Request, message: Option<Value>) -> Result<()> {
        let Some(message) = message else {
            warn!(src = %request.src, "broadcast without a message, ignoring");
            return Ok(());
        };

        node.reply(request, Payload::BroadcastOk).await?;

        let message = Element::from(message);
        let targets = node
            .neighbors()
            .into_iter()
            .filter(|neighbor| *neighbor != request.src)
            .collect();
        let relays = self.admit(&message, targets);
        if relays.is_empty() {
            debug!(%message, "nothing to relay");
        }

        for (dest, msg_id) in relays {
            let this = Arc::clone(&self);
            node.spawn(
                "relay",
                this.relay(node.clone(), dest, msg_id, message.clone()),
            );
        }
        Ok(())
    }

    /// Send until acknowledged, or until the attempt budget runs out.
    async fn relay(self: Arc<Self>, node: Node, dest: String, msg_id: u64, message: Element) -> Result<()> {
        let payload = Payload::Broadcast {
            message: Some(message.into_value()),
        };
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            node.send_request(&dest, msg_id, payload.clone()).await?;
            tokio::time::sleep(self.config.retry_interval).await;

            if !self.is_pending(msg_id) {
                debug!(%dest, msg_id, attempts, "relay acknowledged");
                return Ok(());
            }
            if self.config.max_attempts.is_some_and(|max| attempts >= max) {
                if self.acknowledge(msg_id) {
                    warn!(%dest, msg_id, attempts, "giving up on relay");
                }
                return Ok(());
            }
            debug!(%dest, msg_id, attempts, "relay unacknowledged, resending");
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(BroadcastConfig::default())
    }
}

#[async_trait]
impl Service for Broadcaster {
    fn handles(&self, kind: &str) -> bool {
        matches!(kind, "broadcast" | "broadcast_ok" | "read")
    }

    async fn handle(self: Arc<Self>, node: Node, request: Request) -> Result<()> {
        match &request.body.payload {
            Payload::Broadcast { message } => {
                let message = message.clone();
                self.on_broadcast(node, &request, message).await
            }
            Payload::BroadcastOk => {
                let msg_id = request.body.in_reply_to;
                if !self.acknowledge(msg_id) {
                    warn!(src = %request.src, msg_id, "ack for unknown relay");
                }
                Ok(())
            }
            Payload::Read => {
                let messages = Some(self.seen());
                node.reply(&request, Payload::ReadOk { value: None, messages })
                    .await
            }
            other => {
                debug!(kind = other.kind(), "not a broadcast message");
                Ok(())
            }
        }
    }
}
