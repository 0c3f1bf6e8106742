//! Subscribing boolean flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::domain::node::{Driver, Node, NodeError, NodeState, Role};

/// Payload text that maps to `true`; anything else maps to `false`.
pub const TRUE_TEXT: &str = "True";

/// Converts the stored payload into a `bool` once per tick.
#[derive(Debug)]
pub struct BoolDriver {
    value: Arc<AtomicBool>,
}

impl Driver for BoolDriver {
    fn tick(&mut self, node: &mut NodeState) {
        let on = node.payload() == Some(TRUE_TEXT);
        self.value.store(on, Ordering::Release);
    }
}

/// Read side of a [`BoolDriver`], usable from any thread.
#[derive(Debug, Clone)]
pub struct BoolReader {
    value: Arc<AtomicBool>,
}

impl BoolReader {
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }
}

/// Builds a plain subscribing node named `name` and the reader for its value.
///
/// # Errors
///
/// Returns [`NodeError::InvalidName`] if `name` is not a valid topic name.
pub fn bool_node(name: impl Into<String>) -> Result<(Node, BoolReader), NodeError> {
    let value = Arc::new(AtomicBool::new(false));
    let node = Node::plain(
        name,
        Role::Subscribing,
        BoolDriver {
            value: Arc::clone(&value),
        },
    )?;
    Ok((node, BoolReader { value }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_node_starts_false() {
        let (_, reader) = bool_node("bumper").unwrap();
        assert!(!reader.get());
    }

    #[test]
    fn test_bool_node_follows_payload_after_tick() {
        // Arrange
        let (mut node, reader) = bool_node("bumper").unwrap();

        // Act / Assert
        node.write("True");
        assert!(!reader.get(), "value only changes on tick");
        node.tick();
        assert!(reader.get());

        node.write("False");
        node.tick();
        assert!(!reader.get());
    }

    #[test]
    fn test_bool_node_treats_other_text_as_false() {
        let (mut node, reader) = bool_node("bumper").unwrap();
        node.write("true");
        node.tick();
        assert!(!reader.get(), "match is case-sensitive");
    }
}
