//! Nodes: the named units of state exchanged on the bus.
//!
//! A node has a fixed [`Role`], a name that is unique within that role, one
//! payload slot (last write wins, no history) and a [`Variant`] that decides
//! how reads and writes behave:
//!
//! | Variant          | write(v)                              | read()                               |
//! |------------------|---------------------------------------|--------------------------------------|
//! | `Plain`          | stores `v`                            | returns the stored value             |
//! | `Throttled`      | stores `v` if the interval has passed | returns the value if interval passed |
//! | `EventPublish`   | stores `v`, sets dirty                | returns the value once, then empty   |
//! | `EventSubscribe` | stores `v` and sets dirty if changed  | returns the value once, then empty   |
//!
//! Behaviour that cannot be derived from reads and writes alone (sampling a
//! sensor, turning a payload into a hardware action) lives in a [`Driver`]
//! which the scheduler invokes once per pass through [`Node::tick`].
//!
//! # Sharing with the embedding application
//!
//! The engine runs on its own thread, so nodes are shared through
//! [`NodeHandle`], an `Arc<Mutex<Node>>` that also caches the immutable name
//! and role. The application keeps a clone and may read or write the node
//! from any thread; the engine only holds the lock for the duration of a
//! single read, write or tick.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::protocol::codec::is_valid_topic_name;

/// Errors raised when constructing a node.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The name is empty or contains the wire separator `|`.
    #[error("invalid node name {0:?}: must be non-empty and must not contain '|'")]
    InvalidName(String),
}

/// Which registry a node belongs to. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The node's payload is sent on the bus.
    Publishing,
    /// The node receives payloads from the bus.
    Subscribing,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publishing => f.write_str("publishing"),
            Role::Subscribing => f.write_str("subscribing"),
        }
    }
}

/// The read/write semantics of a node, with the bookkeeping each one needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    Plain,
    Throttled {
        interval: Duration,
        /// Time of the last applied read or write; `None` until the first one.
        last: Option<Instant>,
    },
    EventPublish {
        dirty: bool,
    },
    EventSubscribe {
        dirty: bool,
    },
}

impl Variant {
    fn is_dirty(&self) -> bool {
        match self {
            Variant::EventPublish { dirty } | Variant::EventSubscribe { dirty } => *dirty,
            Variant::Plain | Variant::Throttled { .. } => false,
        }
    }

    fn set_dirty(&mut self, value: bool) {
        if let Variant::EventPublish { dirty } | Variant::EventSubscribe { dirty } = self {
            *dirty = value;
        }
    }

    /// Returns `true` and stamps `now` if a throttled operation may proceed.
    /// Always `true` for the other variants.
    fn admit(&mut self, now: Instant) -> bool {
        match self {
            Variant::Throttled { interval, last } => {
                let open = match *last {
                    None => true,
                    Some(prev) => now.saturating_duration_since(prev) > *interval,
                };
                if open {
                    *last = Some(now);
                }
                open
            }
            _ => true,
        }
    }
}

/// The data half of a node: everything except its driver.
///
/// Drivers receive `&mut NodeState` in [`Driver::tick`] and use the same
/// read/write operations as the engine.
#[derive(Debug, Clone)]
pub struct NodeState {
    name: String,
    role: Role,
    payload: Option<String>,
    variant: Variant,
}

impl NodeState {
    fn new(name: impl Into<String>, role: Role, variant: Variant) -> Result<Self, NodeError> {
        let name = name.into();
        if !is_valid_topic_name(&name) {
            return Err(NodeError::InvalidName(name));
        }
        Ok(Self {
            name,
            role,
            payload: None,
            variant,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// Reads the pending payload according to the variant's semantics.
    ///
    /// Event variants hand out a written value exactly once; throttled nodes
    /// return `None` while inside their interval.
    pub fn read(&mut self) -> Option<String> {
        self.read_at(Instant::now())
    }

    /// [`read`](Self::read) with an explicit clock value.
    pub fn read_at(&mut self, now: Instant) -> Option<String> {
        match self.variant {
            Variant::Plain => self.payload.clone(),
            Variant::Throttled { .. } => {
                if self.variant.admit(now) {
                    self.payload.clone()
                } else {
                    None
                }
            }
            Variant::EventPublish { dirty } | Variant::EventSubscribe { dirty } => {
                if dirty {
                    self.variant.set_dirty(false);
                    self.payload.clone()
                } else {
                    None
                }
            }
        }
    }

    /// Writes a payload according to the variant's semantics.
    ///
    /// Returns `true` if the write was applied (for throttled nodes) or
    /// changed the stored value (for event-subscribe nodes); `true` for every
    /// other write.
    pub fn write(&mut self, value: impl Into<String>) -> bool {
        self.write_at(value, Instant::now())
    }

    /// [`write`](Self::write) with an explicit clock value.
    pub fn write_at(&mut self, value: impl Into<String>, now: Instant) -> bool {
        let value = value.into();
        match self.variant {
            Variant::Plain => {
                self.payload = Some(value);
                true
            }
            Variant::Throttled { .. } => {
                if !self.variant.admit(now) {
                    return false;
                }
                self.payload = Some(value);
                true
            }
            Variant::EventPublish { .. } => {
                self.payload = Some(value);
                self.variant.set_dirty(true);
                true
            }
            Variant::EventSubscribe { .. } => {
                if self.payload.as_deref() == Some(value.as_str()) {
                    return false;
                }
                self.payload = Some(value);
                self.variant.set_dirty(true);
                true
            }
        }
    }

    /// Returns the stored payload without consuming it or touching the
    /// throttle clock.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Removes the stored payload and clears the dirty flag.
    pub fn take(&mut self) -> Option<String> {
        self.variant.set_dirty(false);
        self.payload.take()
    }

    /// `true` while an event variant holds a value nobody has read yet.
    pub fn is_dirty(&self) -> bool {
        self.variant.is_dirty()
    }
}

/// Node-specific behaviour run once per scheduler pass.
///
/// Implementations must return promptly: the scheduler is cooperative and a
/// blocking `tick` stalls every loop of the engine.
pub trait Driver: Send {
    fn tick(&mut self, node: &mut NodeState);
}

/// A node: its state plus an optional driver.
pub struct Node {
    state: NodeState,
    driver: Option<Box<dyn Driver>>,
}

impl Node {
    /// Creates a plain node. Plain nodes have no built-in behaviour, so the
    /// driver is mandatory.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidName`] if `name` is empty or contains `|`.
    pub fn plain(
        name: impl Into<String>,
        role: Role,
        driver: impl Driver + 'static,
    ) -> Result<Self, NodeError> {
        Ok(Self {
            state: NodeState::new(name, role, Variant::Plain)?,
            driver: Some(Box::new(driver)),
        })
    }

    /// Creates a throttled node whose reads and writes apply at most once per
    /// `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidName`] if `name` is empty or contains `|`.
    pub fn throttled(
        name: impl Into<String>,
        role: Role,
        interval: Duration,
    ) -> Result<Self, NodeError> {
        Ok(Self {
            state: NodeState::new(name, role, Variant::Throttled { interval, last: None })?,
            driver: None,
        })
    }

    /// Creates a publishing node that sends each written value exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidName`] if `name` is empty or contains `|`.
    pub fn event_publish(name: impl Into<String>) -> Result<Self, NodeError> {
        Ok(Self {
            state: NodeState::new(name, Role::Publishing, Variant::EventPublish { dirty: false })?,
            driver: None,
        })
    }

    /// Creates a subscribing node that flags changes in the received value.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidName`] if `name` is empty or contains `|`.
    pub fn event_subscribe(name: impl Into<String>) -> Result<Self, NodeError> {
        Ok(Self {
            state: NodeState::new(
                name,
                Role::Subscribing,
                Variant::EventSubscribe { dirty: false },
            )?,
            driver: None,
        })
    }

    /// Attaches (or replaces) the node's driver.
    pub fn with_driver(mut self, driver: impl Driver + 'static) -> Self {
        self.driver = Some(Box::new(driver));
        self
    }

    /// Seeds the payload without going through the variant's write rules, so
    /// a throttled node's clock is not started and no dirty flag is set.
    pub fn with_payload(mut self, value: impl Into<String>) -> Self {
        self.state.payload = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    pub fn read(&mut self) -> Option<String> {
        self.state.read()
    }

    pub fn write(&mut self, value: impl Into<String>) -> bool {
        self.state.write(value)
    }

    /// Advances the node once: runs the driver, then reports the dirty flag.
    pub fn tick(&mut self) -> bool {
        if let Some(driver) = self.driver.as_mut() {
            driver.tick(&mut self.state);
        }
        self.state.is_dirty()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("state", &self.state)
            .field("has_driver", &self.driver.is_some())
            .finish()
    }
}

/// A shareable reference to a registered node.
///
/// Cloning is cheap and every clone refers to the same node.
#[derive(Clone)]
pub struct NodeHandle {
    name: Arc<str>,
    role: Role,
    inner: Arc<Mutex<Node>>,
}

impl NodeHandle {
    pub fn new(node: Node) -> Self {
        Self {
            name: Arc::from(node.name()),
            role: node.role(),
            inner: Arc::new(Mutex::new(node)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Locks the node. A driver that panicked while holding the lock does not
    /// make the node unusable; the poisoned guard is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Node> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self) -> Option<String> {
        self.lock().read()
    }

    pub fn write(&self, value: impl Into<String>) -> bool {
        self.lock().write(value)
    }

    pub fn tick(&self) -> bool {
        self.lock().tick()
    }

    /// Copies the stored payload without consuming it.
    pub fn payload(&self) -> Option<String> {
        self.lock().state().payload().map(str::to_owned)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().state().is_dirty()
    }

    /// `true` if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &NodeHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<Node> for NodeHandle {
    fn from(node: Node) -> Self {
        Self::new(node)
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDriver {
        ticks: Arc<Mutex<u32>>,
    }

    impl Driver for CountingDriver {
        fn tick(&mut self, node: &mut NodeState) {
            let mut ticks = self.ticks.lock().unwrap();
            *ticks += 1;
            node.write(ticks.to_string());
        }
    }

    fn noop_driver() -> CountingDriver {
        CountingDriver {
            ticks: Arc::new(Mutex::new(0)),
        }
    }

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn test_constructors_reject_invalid_names() {
        assert_eq!(
            Node::event_publish("a|b").unwrap_err(),
            NodeError::InvalidName("a|b".to_string())
        );
        assert!(Node::event_subscribe("").is_err());
        assert!(Node::throttled("x|", Role::Publishing, Duration::from_secs(1)).is_err());
        assert!(Node::plain("|", Role::Subscribing, noop_driver()).is_err());
    }

    #[test]
    fn test_event_constructors_fix_role() {
        assert_eq!(Node::event_publish("p").unwrap().role(), Role::Publishing);
        assert_eq!(Node::event_subscribe("s").unwrap().role(), Role::Subscribing);
    }

    // ── Plain ────────────────────────────────────────────────────────────────

    #[test]
    fn test_plain_read_does_not_consume() {
        // Arrange
        let mut node = Node::plain("p", Role::Subscribing, noop_driver()).unwrap();
        node.write("1");

        // Act / Assert
        assert_eq!(node.read().as_deref(), Some("1"));
        assert_eq!(node.read().as_deref(), Some("1"));
    }

    #[test]
    fn test_plain_last_write_wins() {
        let mut node = Node::plain("p", Role::Publishing, noop_driver()).unwrap();
        node.write("a");
        node.write("b");
        assert_eq!(node.read().as_deref(), Some("b"));
    }

    #[test]
    fn test_tick_runs_driver() {
        // Arrange
        let ticks = Arc::new(Mutex::new(0));
        let mut node = Node::plain(
            "counter",
            Role::Publishing,
            CountingDriver {
                ticks: Arc::clone(&ticks),
            },
        )
        .unwrap();

        // Act
        node.tick();
        node.tick();

        // Assert
        assert_eq!(*ticks.lock().unwrap(), 2);
        assert_eq!(node.read().as_deref(), Some("2"));
    }

    #[test]
    fn test_plain_tick_reports_not_dirty() {
        let mut node = Node::plain("p", Role::Publishing, noop_driver()).unwrap();
        assert!(!node.tick());
    }

    // ── Throttled ────────────────────────────────────────────────────────────

    #[test]
    fn test_throttled_second_write_inside_interval_is_noop() {
        // Arrange
        let t0 = Instant::now();
        let mut node = Node::throttled("t", Role::Subscribing, Duration::from_millis(100)).unwrap();
        let state = node.state_mut();

        // Act
        let first = state.write_at("1", t0);
        let second = state.write_at("2", t0 + Duration::from_millis(50));

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(state.payload(), Some("1"));
    }

    #[test]
    fn test_throttled_writes_outside_interval_both_apply() {
        let t0 = Instant::now();
        let mut node = Node::throttled("t", Role::Subscribing, Duration::from_millis(100)).unwrap();
        let state = node.state_mut();

        assert!(state.write_at("1", t0));
        assert!(state.write_at("2", t0 + Duration::from_millis(150)));
        assert_eq!(state.payload(), Some("2"));
    }

    #[test]
    fn test_throttled_exact_interval_is_still_inside() {
        // The interval must be strictly exceeded.
        let t0 = Instant::now();
        let mut node = Node::throttled("t", Role::Publishing, Duration::from_millis(100)).unwrap();
        let state = node.state_mut();

        assert!(state.write_at("1", t0));
        assert!(!state.write_at("2", t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_throttled_read_shares_clock_with_write() {
        // Arrange
        let t0 = Instant::now();
        let mut node = Node::throttled("t", Role::Publishing, Duration::from_millis(100)).unwrap();
        let state = node.state_mut();
        state.write_at("v", t0);

        // Act
        let early = state.read_at(t0 + Duration::from_millis(10));
        let late = state.read_at(t0 + Duration::from_millis(200));
        let again = state.read_at(t0 + Duration::from_millis(210));

        // Assert
        assert_eq!(early, None);
        assert_eq!(late.as_deref(), Some("v"));
        assert_eq!(again, None, "a successful read restarts the interval");
    }

    #[test]
    fn test_with_payload_does_not_start_throttle_clock() {
        let mut node = Node::throttled("t", Role::Publishing, Duration::from_secs(60))
            .unwrap()
            .with_payload("hello");

        assert_eq!(node.read().as_deref(), Some("hello"));
        assert_eq!(node.read(), None);
    }

    // ── EventPublish ─────────────────────────────────────────────────────────

    #[test]
    fn test_event_publish_yields_value_exactly_once() {
        // Arrange
        let mut node = Node::event_publish("btn").unwrap();

        // Act
        node.write("True");
        let first = node.read();
        let second = node.read();
        let third = node.read();

        // Assert
        assert_eq!(first.as_deref(), Some("True"));
        assert_eq!(second, None);
        assert_eq!(third, None);
    }

    #[test]
    fn test_event_publish_rewrite_of_same_value_fires_again() {
        let mut node = Node::event_publish("btn").unwrap();
        node.write("x");
        assert!(node.read().is_some());
        node.write("x");
        assert_eq!(node.read().as_deref(), Some("x"));
    }

    #[test]
    fn test_event_publish_empty_until_written() {
        let mut node = Node::event_publish("btn").unwrap();
        assert_eq!(node.read(), None);
        assert!(!node.tick());
    }

    #[test]
    fn test_event_publish_tick_reports_dirty_flag() {
        let mut node = Node::event_publish("btn").unwrap();
        node.write("1");
        assert!(node.tick());
        node.read();
        assert!(!node.tick());
    }

    // ── EventSubscribe ───────────────────────────────────────────────────────

    #[test]
    fn test_event_subscribe_change_sets_dirty() {
        // Arrange
        let mut node = Node::event_subscribe("temp").unwrap();

        // Act
        let changed = node.write("20");

        // Assert
        assert!(changed);
        assert!(node.state().is_dirty());
    }

    #[test]
    fn test_event_subscribe_unchanged_value_does_not_set_dirty() {
        // Arrange
        let mut node = Node::event_subscribe("temp").unwrap();
        node.write("20");
        node.read();

        // Act
        let changed = node.write("20");

        // Assert
        assert!(!changed);
        assert!(!node.state().is_dirty());
        assert_eq!(node.read(), None);
    }

    #[test]
    fn test_event_subscribe_read_consumes_dirty_once() {
        let mut node = Node::event_subscribe("temp").unwrap();
        node.write("21");

        assert_eq!(node.read().as_deref(), Some("21"));
        assert_eq!(node.read(), None);
        assert_eq!(node.state().payload(), Some("21"), "value itself is retained");
    }

    #[test]
    fn test_take_clears_payload_and_dirty() {
        let mut node = Node::event_subscribe("temp").unwrap();
        node.write("1");

        let taken = node.state_mut().take();

        assert_eq!(taken.as_deref(), Some("1"));
        assert!(!node.state().is_dirty());
        assert_eq!(node.state().payload(), None);
    }

    // ── NodeHandle ───────────────────────────────────────────────────────────

    #[test]
    fn test_handle_caches_name_and_role() {
        let handle = NodeHandle::from(Node::event_subscribe("temp").unwrap());
        assert_eq!(handle.name(), "temp");
        assert_eq!(handle.role(), Role::Subscribing);
    }

    #[test]
    fn test_handle_clones_share_state_across_threads() {
        // Arrange
        let handle = NodeHandle::from(Node::event_publish("btn").unwrap());
        let writer = handle.clone();

        // Act
        std::thread::spawn(move || {
            writer.write("True");
        })
        .join()
        .unwrap();

        // Assert
        assert!(handle.is_dirty());
        assert_eq!(handle.read().as_deref(), Some("True"));
        assert!(handle.ptr_eq(&handle.clone()));
    }

    #[test]
    fn test_handle_payload_peek_does_not_consume() {
        let handle = NodeHandle::from(Node::event_publish("btn").unwrap());
        handle.write("1");

        assert_eq!(handle.payload().as_deref(), Some("1"));
        assert_eq!(handle.read().as_deref(), Some("1"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Publishing.to_string(), "publishing");
        assert_eq!(Role::Subscribing.to_string(), "subscribing");
    }
}
