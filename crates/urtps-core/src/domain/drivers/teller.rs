//! Publishing node that repeats a fixed message.

use std::time::Duration;

use crate::domain::node::{Node, NodeError, Role};

/// Builds a throttled publishing node that offers `message` at most once per
/// `interval`.
///
/// The message is stored through a regular throttled write, which starts the
/// interval clock, so the first frame goes out one interval after creation.
///
/// # Errors
///
/// Returns [`NodeError::InvalidName`] if `name` is not a valid topic name.
pub fn teller_node(
    name: impl Into<String>,
    message: impl Into<String>,
    interval: Duration,
) -> Result<Node, NodeError> {
    let mut node = Node::throttled(name, Role::Publishing, interval)?;
    node.write(message);
    Ok(node)
}
