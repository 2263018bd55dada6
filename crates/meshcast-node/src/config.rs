//! Node tuning knobs.

use std::time::Duration;

/// Configuration shared by the runtime and the services it hosts.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Stop on the first protocol violation. When off, malformed or
    /// unroutable messages are logged and skipped; transport failures still
    /// stop the node.
    pub strict: bool,
    /// Pause between two sends of an unacknowledged broadcast relay.
    pub retry_interval: Duration,
    /// Give up on a relay after this many sends. `None` retries until acked.
    pub max_relay_attempts: Option<u32>,
    /// Pause between two full-state anti-entropy rounds.
    pub gossip_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            strict: true,
            retry_interval: Duration::from_secs(1),
            max_relay_attempts: None,
            gossip_interval: Duration::from_secs(1),
        }
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    pub fn max_relay_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.max_relay_attempts = attempts;
        self
    }

    pub fn gossip_interval(mut self, interval: Duration) -> Self {
        self.config.gossip_interval = interval;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
