//! Reference driver nodes.
//!
//! Small, hardware-free nodes that exercise each node variant. Real actuator
//! and sensor drivers live outside this crate and follow the same pattern:
//! construct a [`Node`](crate::domain::node::Node) with a
//! [`Driver`](crate::domain::node::Driver) and keep any value the application
//! needs to read in a thread-safe cell.
//!
//! - **`bool_node`** – subscribing flag that turns `"True"` into a shared `bool`.
//! - **`teller`** – publishing node that repeats a fixed message on a throttle.
//! - **`echo`** – subscribing node that logs what it receives.
//! - **`toggle`** – publishing node that alternates `"True"`/`"False"`.

pub mod bool_node;
pub mod echo;
pub mod teller;
pub mod toggle;

pub use bool_node::{bool_node, BoolDriver, BoolReader};
pub use echo::{echo_node, EchoDriver};
pub use teller::teller_node;
pub use toggle::{toggle_node, ToggleDriver};
