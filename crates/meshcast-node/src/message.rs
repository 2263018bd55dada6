//! Wire format exchanged with the harness.
//!
//! One JSON object per line:
//!
//! ```text
//! request: {"id":0,"src":"c1","dest":"n1","body":{"type":"init","msg_id":1,"in_reply_to":0,...}}
//! reply:   {"src":"n1","dest":"c1","body":{"type":"init_ok","msg_id":0,"in_reply_to":1}}
//! ```
//!
//! The body is a tagged union keyed by `type`. Missing fields decode to their
//! zero value, so handlers only ever look at the variant.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An inbound line, or a request this node originates.
///
/// Replies addressed to this node (such as `broadcast_ok`) decode as requests
/// too; their `id` is simply zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: u64,
    pub src: String,
    pub dest: String,
    pub body: Body,
}

/// A response to a request. Carries no top-level `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub src: String,
    pub dest: String,
    pub body: Body,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub msg_id: u64,
    #[serde(default)]
    pub in_reply_to: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        #[serde(default)]
        node_id: String,
        #[serde(default)]
        node_ids: Vec<String>,
    },
    InitOk,
    Topology {
        #[serde(default)]
        topology: HashMap<String, Vec<String>>,
    },
    TopologyOk,
    Read,
    ReadOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<Value>>,
    },
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
    },
    BroadcastOk,
    Add {
        #[serde(default, alias = "element")]
        delta: Value,
    },
    AddOk,
    Replicate {
        #[serde(default)]
        value: String,
    },
    Echo {
        #[serde(default)]
        echo: String,
    },
    EchoOk {
        echo: String,
    },
    /// Any `type` this build does not know about.
    #[serde(other)]
    Unknown,
}

impl Payload {
    /// The wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Init { .. } => "init",
            Payload::InitOk => "init_ok",
            Payload::Topology { .. } => "topology",
            Payload::TopologyOk => "topology_ok",
            Payload::Read => "read",
            Payload::ReadOk { .. } => "read_ok",
            Payload::Broadcast { .. } => "broadcast",
            Payload::BroadcastOk => "broadcast_ok",
            Payload::Add { .. } => "add",
            Payload::AddOk => "add_ok",
            Payload::Replicate { .. } => "replicate",
            Payload::Echo { .. } => "echo",
            Payload::EchoOk { .. } => "echo_ok",
            Payload::Unknown => "unknown",
        }
    }
}

impl Body {
    pub fn new(msg_id: u64, payload: Payload) -> Self {
        Self {
            msg_id,
            in_reply_to: 0,
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

impl Request {
    pub fn new(src: impl Into<String>, dest: impl Into<String>, body: Body) -> Self {
        Self {
            id: 0,
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }

    /// Decode one input line. Malformed JSON is a protocol violation.
    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|source| NodeError::Decode {
            line: line.to_string(),
            source,
        })
    }

    /// The reply addressed back to this request's sender.
    pub fn reply(&self, src: impl Into<String>, payload: Payload) -> Reply {
        Reply {
            src: src.into(),
            dest: self.src.clone(),
            body: Body {
                msg_id: 0,
                in_reply_to: self.body.msg_id,
                payload,
            },
        }
    }
}

/// Encode any envelope as a single line, without the trailing newline.
pub fn encode<M: Serialize>(message: &M) -> Result<String> {
    serde_json::to_string(message).map_err(NodeError::Encode)
}

#[derive(Deserialize)]
struct TypeOnly {
    body: TypeTag,
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    kind: String,
}

/// The `type` of a line as written on the wire, including types that decode
/// as [`Payload::Unknown`].
pub fn wire_type(line: &str) -> Option<String> {
    serde_json::from_str::<TypeOnly>(line)
        .ok()
        .map(|envelope| envelope.body.kind)
}
