//! Subscribing node that logs every payload it receives.

use tracing::info;

use crate::domain::node::{Driver, Node, NodeError, NodeState, Role};

/// Logs and clears the stored payload on each tick.
#[derive(Debug, Default)]
pub struct EchoDriver {
    echoed: u64,
}

impl EchoDriver {
    /// Number of payloads logged so far.
    pub fn echoed(&self) -> u64 {
        self.echoed
    }
}

impl Driver for EchoDriver {
    fn tick(&mut self, node: &mut NodeState) {
        if let Some(payload) = node.take() {
            self.echoed += 1;
            info!(topic = node.name(), "message received: {payload}");
        }
    }
}

/// Builds a plain subscribing node that echoes what arrives on `name`.
///
/// # Errors
///
/// Returns [`NodeError::InvalidName`] if `name` is not a valid topic name.
pub fn echo_node(name: impl Into<String>) -> Result<Node, NodeError> {
    Node::plain(name, Role::Subscribing, EchoDriver::default())
}
