//! Domain layer: nodes, the topic registry and reference drivers.
//!
//! This module is entirely pure Rust with no I/O, making it straightforward
//! to unit-test and reuse on both sides of the bus.

pub mod drivers;
pub mod node;
pub mod registry;

pub use node::{Driver, Node, NodeError, NodeHandle, NodeState, Role, Variant};
pub use registry::TopicRegistry;
