//! Infrastructure layer of the engine.
//!
//! OS-facing adapters: the multicast socket and its bootstrap hook, the
//! in-memory loopback bus, and TOML configuration storage.
//!
//! The scheduler in `application` talks to the network only through the
//! [`network::Transport`] trait defined here.

pub mod network;
pub mod storage;
