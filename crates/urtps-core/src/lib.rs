//! # urtps-core
//!
//! Shared library for the uRTPS publish/subscribe bus containing the frame
//! codec, the node model and the topic registry.
//!
//! It has no dependencies on sockets or an async runtime; the transport and
//! scheduler live in `urtps-engine`.
//!
//! # Architecture overview
//!
//! Peers on one LAN (a controller and any number of robot units) exchange
//! small, frequently updated values such as sensor readings and motion
//! commands. There is no broker: every peer joins the same IPv4 multicast
//! group and sends each value as one UDP datagram.
//!
//! - **`protocol`** – How a value travels. A frame is the UTF-8 text
//!   `"<topic>|<value>"`; [`encode_frame`] and [`decode_frame`] convert
//!   between the text and a [`Frame`].
//!
//! - **`domain`** – The unit of state. A [`Node`] has a name, a fixed
//!   [`Role`] and one of four read/write behaviours (plain, throttled,
//!   event-publish, event-subscribe). A [`TopicRegistry`] maps names to nodes
//!   in a stable order.

pub mod domain;
pub mod protocol;

pub use domain::node::{Driver, Node, NodeError, NodeHandle, NodeState, Role, Variant};
pub use domain::registry::TopicRegistry;
pub use protocol::codec::{decode_frame, encode_frame, CodecError, Frame};
pub use protocol::counters::{TrafficCounters, TrafficSnapshot};
