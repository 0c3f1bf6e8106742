//! Application layer of the engine.
//!
//! # Sub-modules
//!
//! - **`config`** – [`config::EngineConfig`]: group, port, buffer size and
//!   pass pacing for one engine.
//!
//! - **`scheduler`** – the four cooperative loops (receive, publish and the
//!   two tick loops) and the routing of received frames into subscribing
//!   nodes.
//!
//! - **`engine`** – [`engine::Engine`]: owns the node registries and the
//!   transport, and starts, runs and stops the scheduler.
//!
//! This layer reaches the network only through the
//! [`Transport`](crate::infrastructure::network::Transport) trait, so tests
//! drive it with the in-memory loopback bus.

pub mod config;
pub mod engine;
pub mod scheduler;
