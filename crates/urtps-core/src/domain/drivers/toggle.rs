//! Publishing node that alternates between `"True"` and `"False"`.

use crate::domain::node::{Driver, Node, NodeError, NodeState};

/// Flips the published value every `every` ticks.
#[derive(Debug)]
pub struct ToggleDriver {
    every: u32,
    ticks: u32,
    state: bool,
}

impl ToggleDriver {
    /// `every` is clamped to at least 1.
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1),
            ticks: 0,
            state: false,
        }
    }
}

impl Driver for ToggleDriver {
    fn tick(&mut self, node: &mut NodeState) {
        self.ticks += 1;
        if self.ticks < self.every {
            return;
        }
        self.ticks = 0;
        self.state = !self.state;
        node.write(if self.state { "True" } else { "False" });
    }
}

/// Builds an event-publish node that emits a new value every `every` ticks.
///
/// # Errors
///
/// Returns [`NodeError::InvalidName`] if `name` is not a valid topic name.
pub fn toggle_node(name: impl Into<String>, every: u32) -> Result<Node, NodeError> {
    Ok(Node::event_publish(name)?.with_driver(ToggleDriver::new(every)))
}
