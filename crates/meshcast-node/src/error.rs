//! Error types for the node runtime.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running a node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("undecodable {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("received {0} before init")]
    NotInitialized(String),

    #[error("node is already initialized")]
    AlreadyInitialized,

    #[error("no handler for message type {0}")]
    NoHandler(String),

    #[error("no reply from {node} within {timeout:?}")]
    NoReply { node: String, timeout: Duration },
}

impl NodeError {
    /// Whether this error must stop the node.
    ///
    /// Transport failures always do. Every other protocol violation stops a
    /// strict node and is skipped by a lenient one.
    pub fn is_fatal(&self, strict: bool) -> bool {
        match self {
            NodeError::Io(_) => true,
            _ => strict,
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
