//! urtps-engine library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `urtps-peer` binary share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::config::EngineConfig;
pub use application::engine::{Engine, EngineError, EngineStats};
pub use application::scheduler::{route_frame, RouteOutcome, Scheduler, UnknownTopicObserver};
pub use infrastructure::network::{Transport, TransportError};
