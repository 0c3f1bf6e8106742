//! The engine: node registries, transport and scheduler lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start()──► Starting ──connect ok──► Running ──stop() / fatal error──► Stopping ──► Idle
//!                       │
//!                       └──connect failed──► Idle
//! ```
//!
//! Nodes are registered while the engine is idle. When a run starts the
//! engine takes a snapshot of both registries, so a node registered during a
//! run is picked up by the next one.
//!
//! A run that is cancelled (its `run()` future dropped) or unwound by a
//! panicking driver still closes the transport and returns to Idle.
//!
//! # Threads
//!
//! All four loops run on one task. [`Engine::start`] blocks the calling
//! thread on a current-thread tokio runtime; [`Engine::start_in_background`]
//! does the same on a dedicated `urtps-engine` thread. Callers that already
//! own a runtime use [`Engine::run`] instead.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use urtps_core::{NodeHandle, Role, TopicRegistry, TrafficCounters, TrafficSnapshot};

use crate::application::config::EngineConfig;
use crate::application::scheduler::{self, RouteOutcome, Scheduler, UnknownTopicObserver};
use crate::infrastructure::network::{
    Bootstrapped, MulticastTransport, NetworkBootstrap, Transport, TransportError,
};

/// Name of the thread started by [`Engine::start_in_background`].
pub const ENGINE_THREAD_NAME: &str = "urtps-engine";

const IDLE: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

/// Traffic counters of an engine at one point in time.
pub type EngineStats = TrafficSnapshot;

/// Errors returned by the engine's start methods.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transport could not be connected; no loop was started.
    #[error("failed to connect transport: {0}")]
    Connect(#[source] TransportError),
    /// `start` was called while a run is in progress.
    #[error("engine is already running")]
    AlreadyRunning,
    /// The tokio runtime could not be built.
    #[error("failed to build engine runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// The background thread could not be spawned.
    #[error("failed to spawn engine thread: {0}")]
    Thread(#[source] std::io::Error),
    /// A loop hit an unrecoverable transport error and the engine shut down.
    #[error("engine stopped on transport error: {0}")]
    Fatal(#[source] TransportError),
}

/// A publish/subscribe engine bound to one transport.
pub struct Engine {
    config: EngineConfig,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    publishing: RwLock<TopicRegistry>,
    subscribing: RwLock<TopicRegistry>,
    observer: RwLock<Option<UnknownTopicObserver>>,
    counters: TrafficCounters,
    state: AtomicU8,
    running: AtomicBool,
}

impl Engine {
    /// Creates an engine on a [`MulticastTransport`] for `config.group:config.port`.
    pub fn new(config: EngineConfig) -> Self {
        let transport = MulticastTransport::new(config.group, config.port);
        Self::with_transport(config, transport)
    }

    /// Creates an engine whose multicast socket is opened only after
    /// `bootstrap` has brought the platform network up, within
    /// `config.bootstrap_timeout`.
    pub fn with_bootstrap(config: EngineConfig, bootstrap: impl NetworkBootstrap + 'static) -> Self {
        let inner = MulticastTransport::new(config.group, config.port);
        let transport = Bootstrapped::new(bootstrap, inner, config.bootstrap_timeout);
        Self::with_transport(config, transport)
    }

    /// Creates an engine on any transport.
    pub fn with_transport(config: EngineConfig, transport: impl Transport + 'static) -> Self {
        Self {
            config,
            transport: tokio::sync::Mutex::new(Box::new(transport)),
            publishing: RwLock::new(TopicRegistry::new()),
            subscribing: RwLock::new(TopicRegistry::new()),
            observer: RwLock::new(None),
            counters: TrafficCounters::new(),
            state: AtomicU8::new(IDLE),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Registers a node whose payload is sent on the bus. A node already
    /// registered under the same name is replaced.
    pub fn register_publishing(&self, node: impl Into<NodeHandle>) -> NodeHandle {
        self.register(Role::Publishing, node.into())
    }

    pub fn register_publishing_all<I>(&self, nodes: I) -> Vec<NodeHandle>
    where
        I: IntoIterator,
        I::Item: Into<NodeHandle>,
    {
        nodes
            .into_iter()
            .map(|n| self.register_publishing(n))
            .collect()
    }

    /// Registers a node that receives payloads from the bus. A node already
    /// registered under the same name is replaced.
    pub fn register_subscribing(&self, node: impl Into<NodeHandle>) -> NodeHandle {
        self.register(Role::Subscribing, node.into())
    }

    pub fn register_subscribing_all<I>(&self, nodes: I) -> Vec<NodeHandle>
    where
        I: IntoIterator,
        I::Item: Into<NodeHandle>,
    {
        nodes
            .into_iter()
            .map(|n| self.register_subscribing(n))
            .collect()
    }

    /// Registers each node in the registry matching its own role.
    pub fn register_mixed<I>(&self, nodes: I) -> Vec<NodeHandle>
    where
        I: IntoIterator,
        I::Item: Into<NodeHandle>,
    {
        nodes
            .into_iter()
            .map(|n| {
                let node = n.into();
                self.register(node.role(), node)
            })
            .collect()
    }

    fn register(&self, target: Role, node: NodeHandle) -> NodeHandle {
        if node.role() != target {
            warn!(
                topic = node.name(),
                "{} node registered as {target}",
                node.role()
            );
        }
        if self.state.load(Ordering::Acquire) != IDLE {
            warn!(
                topic = node.name(),
                "node registered while the engine runs; it takes effect on the next start"
            );
        }
        let registry = match target {
            Role::Publishing => &self.publishing,
            Role::Subscribing => &self.subscribing,
        };
        if write(registry).insert(node.clone()).is_some() {
            debug!(topic = node.name(), "replaced {target} node");
        }
        node
    }

    /// Looks up a registered publishing node.
    pub fn publisher(&self, name: &str) -> Option<NodeHandle> {
        read(&self.publishing).get(name).cloned()
    }

    /// Looks up a registered subscribing node.
    pub fn subscriber(&self, name: &str) -> Option<NodeHandle> {
        read(&self.subscribing).get(name).cloned()
    }

    /// Topic names of the given role, in registration order.
    pub fn topics(&self, role: Role) -> Vec<String> {
        let registry = match role {
            Role::Publishing => read(&self.publishing),
            Role::Subscribing => read(&self.subscribing),
        };
        registry.names().map(str::to_owned).collect()
    }

    /// Installs a callback invoked with the topic of every received frame
    /// that no subscribing node claims. Replaces any previous observer.
    pub fn set_unknown_topic_observer(&self, observer: impl Fn(&str) + Send + Sync + 'static) {
        *write(&self.observer) = Some(Arc::new(observer));
    }

    // ── Routing and statistics ───────────────────────────────────────────────

    /// Routes one datagram exactly as the receive loop does.
    pub fn route_frame(&self, datagram: &[u8]) -> RouteOutcome {
        let observer = read(&self.observer).clone();
        scheduler::route_frame(
            datagram,
            &read(&self.subscribing),
            &self.counters,
            observer.as_ref(),
        )
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// `true` from a successful connect until the loops have ended.
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Connects the transport and runs the four loops on the current task
    /// until [`stop`](Self::stop) is called or a loop fails.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyRunning`] if a run is in progress.
    /// - [`EngineError::Connect`] if the transport cannot be connected.
    /// - [`EngineError::Fatal`] if a loop stopped the engine.
    pub async fn run(&self) -> Result<(), EngineError> {
        self.claim()?;
        self.drive().await
    }

    /// Runs the engine on the calling thread until it stops.
    ///
    /// Must not be called from inside a tokio runtime; use [`run`](Self::run)
    /// there.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run); also [`EngineError::Runtime`].
    pub fn start(&self) -> Result<(), EngineError> {
        self.claim()?;
        let runtime = match build_runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.release();
                error!("cannot build engine runtime: {e}");
                return Err(EngineError::Runtime(e));
            }
        };
        runtime.block_on(self.drive())
    }

    /// Runs the engine on a new `urtps-engine` thread and returns at once.
    ///
    /// The engine counts as started as soon as this returns, so a
    /// [`stop`](Self::stop) issued right after it is never lost. Join the
    /// handle to collect the run's result.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyRunning`] or [`EngineError::Thread`]. Connect
    /// and runtime failures are reported through the join handle.
    pub fn start_in_background(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<(), EngineError>>, EngineError> {
        self.claim()?;
        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name(ENGINE_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = build_runtime().map_err(|e| {
                    engine.release();
                    error!("cannot build engine runtime: {e}");
                    EngineError::Runtime(e)
                })?;
                runtime.block_on(engine.drive())
            })
            .map_err(|e| {
                self.release();
                error!("cannot spawn engine thread: {e}");
                EngineError::Thread(e)
            })
    }

    /// Asks every loop to end. The transport is closed once they have.
    /// Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("engine stop requested");
        }
    }

    fn claim(&self) -> Result<(), EngineError> {
        self.state
            .compare_exchange(IDLE, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::AlreadyRunning)?;
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn release(&self) {
        self.running.store(false, Ordering::Release);
        self.state.store(IDLE, Ordering::Release);
    }

    async fn drive(&self) -> Result<(), EngineError> {
        // Must exist before the first await so a dropped or unwinding run
        // still releases the engine.
        let mut run = RunGuard {
            engine: self,
            transport: None,
        };
        let transport = run.transport.insert(self.transport.lock().await);

        debug!("connecting transport");
        if let Err(e) = transport.connect().await {
            error!("engine failed to start: {e}");
            return Err(EngineError::Connect(e));
        }
        if !self.running.load(Ordering::Acquire) {
            info!("engine stopped before its loops started");
            return Ok(());
        }

        let publishing = read(&self.publishing).clone();
        let subscribing = read(&self.subscribing).clone();
        let observer = read(&self.observer).clone();

        self.state.store(RUNNING, Ordering::Release);
        info!(
            group = %self.config.group,
            port = self.config.port,
            publishing = publishing.len(),
            subscribing = subscribing.len(),
            "engine running"
        );

        let result = Scheduler::new(
            &***transport,
            &publishing,
            &subscribing,
            &self.counters,
            &self.running,
        )
        .with_observer(observer.as_ref())
        .with_pass_interval(self.config.pass_interval)
        .with_recv_buffer_size(self.config.recv_buffer_size)
        .run()
        .await;

        drop(run);
        info!("engine stopped");
        result.map_err(EngineError::Fatal)
    }
}

/// Ends a run: closes the transport (if it was locked) and releases the
/// engine back to idle when dropped.
struct RunGuard<'a> {
    engine: &'a Engine,
    transport: Option<tokio::sync::MutexGuard<'a, Box<dyn Transport>>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.engine.state.store(STOPPING, Ordering::Release);
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
        if std::thread::panicking() {
            error!("engine run aborted by a panic; transport closed");
        }
        self.engine.release();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("publishing", &self.topics(Role::Publishing))
            .field("subscribing", &self.topics(Role::Subscribing))
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::bootstrap::MockNetworkBootstrap;
    use crate::infrastructure::network::LoopbackBus;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use urtps_core::domain::drivers::toggle_node;
    use urtps_core::{Driver, Node, NodeState};

    /// Panics on its first tick only.
    struct PanicOnce {
        fired: Arc<AtomicBool>,
    }

    impl Driver for PanicOnce {
        fn tick(&mut self, _node: &mut NodeState) {
            if !self.fired.swap(true, Ordering::SeqCst) {
                panic!("driver failure");
            }
        }
    }

    fn loopback_engine() -> (LoopbackBus, Engine) {
        let bus = LoopbackBus::new();
        let engine = Engine::with_transport(EngineConfig::default(), bus.endpoint());
        (bus, engine)
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    // ── Registration ──────────────────────────────────────────────────────────

    #[test]
    fn test_duplicate_registration_replaces_node() {
        // Arrange
        let (_bus, engine) = loopback_engine();
        let first = engine.register_subscribing(Node::event_subscribe("temp").unwrap());

        // Act
        let second = engine.register_subscribing(Node::event_subscribe("temp").unwrap());

        // Assert
        assert_eq!(engine.topics(Role::Subscribing), vec!["temp".to_string()]);
        let current = engine.subscriber("temp").unwrap();
        assert!(current.ptr_eq(&second));
        assert!(!current.ptr_eq(&first));
    }

    #[test]
    fn test_register_mixed_dispatches_by_role() {
        // Arrange
        let (_bus, engine) = loopback_engine();
        let nodes = vec![
            Node::event_publish("btn").unwrap(),
            Node::event_subscribe("temp").unwrap(),
            Node::event_publish("led").unwrap(),
        ];

        // Act
        let handles = engine.register_mixed(nodes);

        // Assert
        assert_eq!(handles.len(), 3);
        assert_eq!(
            engine.topics(Role::Publishing),
            vec!["btn".to_string(), "led".to_string()]
        );
        assert_eq!(engine.topics(Role::Subscribing), vec!["temp".to_string()]);
    }

    #[test]
    fn test_register_all_keeps_order() {
        let (_bus, engine) = loopback_engine();
        engine.register_publishing_all(
            ["c", "a", "b"].map(|n| Node::event_publish(n).unwrap()),
        );
        assert_eq!(engine.topics(Role::Publishing), vec!["c", "a", "b"]);
    }

    // ── Routing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_route_frame_updates_known_topic_only() {
        // Arrange
        let (_bus, engine) = loopback_engine();
        let temp = engine.register_subscribing(Node::event_subscribe("temp").unwrap());
        let unknown_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&unknown_seen);
        engine.set_unknown_topic_observer(move |t| sink.lock().unwrap().push(t.to_string()));

        // Act
        let delivered = engine.route_frame(b"temp|23.5");
        let unknown = engine.route_frame(b"unknown|1");

        // Assert
        assert_eq!(delivered, RouteOutcome::Delivered { topic: "temp".into() });
        assert_eq!(unknown, RouteOutcome::UnknownTopic { topic: "unknown".into() });
        assert_eq!(temp.payload().as_deref(), Some("23.5"));
        assert_eq!(*unknown_seen.lock().unwrap(), vec!["unknown".to_string()]);
        let stats = engine.stats();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_delivered, 1);
        assert_eq!(stats.unknown_topics, 1);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_connect_failure_is_returned_and_engine_stays_idle() {
        // Arrange
        let bus = LoopbackBus::new();
        let engine = Engine::with_transport(EngineConfig::default(), bus.failing_endpoint());

        // Act
        let result = engine.run().await;

        // Assert
        assert!(matches!(result, Err(EngineError::Connect(TransportError::Bind { .. }))));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_bootstrap_failure_prevents_start() {
        // Arrange
        let mut bootstrap = MockNetworkBootstrap::new();
        bootstrap
            .expect_join()
            .times(1)
            .returning(|| Err("access point unreachable".to_string()));
        let engine = Engine::with_bootstrap(EngineConfig::default(), bootstrap);

        // Act
        let result = engine.run().await;

        // Assert
        assert!(matches!(
            result,
            Err(EngineError::Connect(TransportError::Bootstrap(ref r))) if r == "access point unreachable"
        ));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_send_failure_shuts_engine_down() {
        // Arrange
        let (bus, engine) = loopback_engine();
        engine.register_publishing(toggle_node("btn", 1).unwrap());
        bus.fail_sends(true);

        // Act
        let result = tokio::time::timeout(Duration::from_secs(5), engine.run())
            .await
            .expect("engine must stop after a fatal send error");

        // Assert
        assert!(matches!(result, Err(EngineError::Fatal(TransportError::Send(_)))));
        assert!(!engine.is_running());
        assert_eq!(engine.stats().io_errors, 1);
    }

    #[test]
    fn test_second_start_is_rejected_while_running() {
        // Arrange
        let (_bus, engine) = loopback_engine();
        let engine = Arc::new(engine);
        let handle = engine.start_in_background().unwrap();

        // Act
        let second = engine.start();

        // Assert
        assert!(matches!(second, Err(EngineError::AlreadyRunning)));
        engine.stop();
        assert!(handle.join().unwrap().is_ok());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_background_engine_runs_until_stopped() {
        // Arrange
        let (bus, engine) = loopback_engine();
        let engine = Arc::new(engine);
        let temp = engine.register_subscribing(Node::event_subscribe("temp").unwrap());

        // Act
        let handle = engine.start_in_background().unwrap();
        assert!(wait_until(Duration::from_secs(5), || engine.is_running()));
        bus.inject(b"temp|21");
        let received = wait_until(Duration::from_secs(5), || temp.payload().is_some());
        engine.stop();
        let result = handle.join().unwrap();

        // Assert
        assert!(received, "receive loop must route the injected frame");
        assert_eq!(temp.read().as_deref(), Some("21"));
        assert!(result.is_ok());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_engine_can_restart_after_stop() {
        let (_bus, engine) = loopback_engine();
        let engine = Arc::new(engine);

        for _ in 0..2 {
            let handle = engine.start_in_background().unwrap();
            engine.stop();
            assert!(handle.join().unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_releases_engine_and_closes_transport() {
        // Arrange
        let (bus, engine) = loopback_engine();

        // Act
        let first = tokio::time::timeout(Duration::from_millis(50), engine.run()).await;

        // Assert
        assert!(first.is_err(), "run must still be going when the timeout fires");
        assert!(!engine.is_running());
        assert_eq!(bus.connected_endpoints(), 0, "transport must be closed");
        let second = tokio::time::timeout(Duration::from_millis(50), engine.run()).await;
        assert!(
            !matches!(second, Ok(Err(EngineError::AlreadyRunning))),
            "a cancelled run must not block the next one"
        );
    }

    #[test]
    fn test_panicking_driver_releases_engine() {
        // Arrange
        let (bus, engine) = loopback_engine();
        let engine = Arc::new(engine);
        let fired = Arc::new(AtomicBool::new(false));
        engine.register_publishing(
            Node::plain(
                "x",
                Role::Publishing,
                PanicOnce {
                    fired: Arc::clone(&fired),
                },
            )
            .unwrap(),
        );

        // Act
        let handle = engine.start_in_background().unwrap();
        let joined = handle.join();

        // Assert
        assert!(joined.is_err(), "the driver panic must reach the join handle");
        assert!(fired.load(Ordering::SeqCst));
        assert!(!engine.is_running());
        assert_eq!(bus.connected_endpoints(), 0, "transport must be closed");
        let restarted = engine.start_in_background().unwrap();
        engine.stop();
        assert!(restarted.join().unwrap().is_ok());
    }

    #[test]
    fn test_stop_when_idle_is_a_noop() {
        let (_bus, engine) = loopback_engine();
        engine.stop();
        engine.stop();
        assert!(!engine.is_running());
    }
}
