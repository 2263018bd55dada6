//! The echo node: answers every `echo` with the same text.

use crate::error::Result;
use crate::message::{Payload, Request};
use crate::node::Node;
use crate::runtime::Service;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default)]
pub struct Echo;

#[async_trait]
impl Service for Echo {
    fn handles(&self, kind: &str) -> bool {
        kind == "echo"
    }

    async fn handle(self: Arc<Self>, node: Node, request: Request) -> Result<()> {
        if let Payload::Echo { echo } = &request.body.payload {
            let echo = echo.clone();
            node.reply(&request, Payload::EchoOk { echo }).await?;
        }
        Ok(())
    }
}
