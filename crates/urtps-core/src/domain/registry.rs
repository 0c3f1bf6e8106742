//! Name-keyed, insertion-ordered node registry.
//!
//! The engine keeps one registry for publishing nodes and one for subscribing
//! nodes. Iteration follows first-insertion order so every scheduler pass
//! visits nodes in the same sequence. Inserting a name that is already
//! present replaces the node in place, keeping its original position.

use std::collections::HashMap;

use crate::domain::node::NodeHandle;

/// Registry of nodes keyed by topic name.
#[derive(Debug, Default, Clone)]
pub struct TopicRegistry {
    nodes: Vec<NodeHandle>,
    index: HashMap<String, usize>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `node` under its name. Returns the node it replaced, if any.
    pub fn insert(&mut self, node: NodeHandle) -> Option<NodeHandle> {
        match self.index.get(node.name()) {
            Some(&slot) => Some(std::mem::replace(&mut self.nodes[slot], node)),
            None => {
                self.index.insert(node.name().to_string(), self.nodes.len());
                self.nodes.push(node);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&NodeHandle> {
        self.index.get(name).map(|&slot| &self.nodes[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates nodes in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, NodeHandle> {
        self.nodes.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(NodeHandle::name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'a> IntoIterator for &'a TopicRegistry {
    type Item = &'a NodeHandle;
    type IntoIter = std::slice::Iter<'a, NodeHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
