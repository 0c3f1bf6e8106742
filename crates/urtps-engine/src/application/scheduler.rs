//! The four cooperative loops that link node state to wire traffic.
//!
//! | Loop             | Each pass                                                      |
//! |------------------|----------------------------------------------------------------|
//! | receive          | read one datagram, decode it, write it into the matching node |
//! | publish          | read every publishing node, send each non-empty payload        |
//! | subscribing tick | tick every subscribing node in registration order              |
//! | publishing tick  | tick every publishing node in registration order               |
//!
//! The loops are plain futures and never spawn: the engine joins all four on
//! a single task, so they interleave only at their `.await` points. Every
//! transport call is non-blocking, which keeps each pass short.
//!
//! Each pass is also exposed as a synchronous method (`receive_pass`,
//! `publish_pass`, `tick_pass`) so callers can step the scheduler by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use urtps_core::{decode_frame, encode_frame, CodecError, Role, TopicRegistry, TrafficCounters};

use crate::infrastructure::network::{Transport, TransportError};

/// Callback invoked with the topic of every frame no subscribing node claims.
pub type UnknownTopicObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// What happened to one received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The payload was written into the subscribing node named `topic`.
    /// The node's own write rules (throttling, change detection) still apply.
    Delivered { topic: String },
    /// No subscribing node is registered under `topic`; the frame was dropped.
    UnknownTopic { topic: String },
    /// The datagram could not be decoded and was dropped.
    Malformed(CodecError),
}

/// Decodes `datagram` and writes its value into the matching subscribing node.
///
/// Updates `counters` and calls `observer` for unknown topics. Never fails:
/// every problem is reported as a [`RouteOutcome`].
pub fn route_frame(
    datagram: &[u8],
    subscribing: &TopicRegistry,
    counters: &TrafficCounters,
    observer: Option<&UnknownTopicObserver>,
) -> RouteOutcome {
    counters.frames_received.incr();
    let frame = match decode_frame(datagram) {
        Ok(frame) => frame,
        Err(e) => {
            counters.decode_errors.incr();
            debug!("dropping malformed frame: {e}");
            return RouteOutcome::Malformed(e);
        }
    };

    match subscribing.get(&frame.name) {
        Some(node) => {
            node.write(frame.value);
            counters.frames_delivered.incr();
            RouteOutcome::Delivered { topic: frame.name }
        }
        None => {
            counters.unknown_topics.incr();
            debug!(topic = %frame.name, "no subscriber for topic");
            if let Some(observer) = observer {
                observer(&frame.name);
            }
            RouteOutcome::UnknownTopic { topic: frame.name }
        }
    }
}

/// Borrowed view of everything the loops need for one engine run.
pub struct Scheduler<'a> {
    transport: &'a dyn Transport,
    publishing: &'a TopicRegistry,
    subscribing: &'a TopicRegistry,
    counters: &'a TrafficCounters,
    observer: Option<&'a UnknownTopicObserver>,
    running: &'a AtomicBool,
    pass_interval: Duration,
    recv_buffer_size: usize,
}

impl<'a> Scheduler<'a> {
    /// Creates a scheduler over a connected transport.
    ///
    /// The loops run while `running` is `true`; any loop that hits a fatal
    /// error clears it, which ends the other three on their next pass.
    pub fn new(
        transport: &'a dyn Transport,
        publishing: &'a TopicRegistry,
        subscribing: &'a TopicRegistry,
        counters: &'a TrafficCounters,
        running: &'a AtomicBool,
    ) -> Self {
        Self {
            transport,
            publishing,
            subscribing,
            counters,
            observer: None,
            running,
            pass_interval: Duration::ZERO,
            recv_buffer_size: crate::application::config::DEFAULT_RECV_BUFFER_SIZE,
        }
    }

    pub fn with_observer(mut self, observer: Option<&'a UnknownTopicObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_pass_interval(mut self, pass_interval: Duration) -> Self {
        self.pass_interval = pass_interval;
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.max(1);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Ends one pass: sleeps for the pass interval, or just yields when it
    /// is zero.
    async fn pause(&self) {
        if self.pass_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.pass_interval).await;
        }
    }

    // ── Single passes ─────────────────────────────────────────────────────────

    /// Reads at most one datagram and routes it.
    ///
    /// A datagram that fills `buf` completely may have been cut short, so it
    /// is dropped as [`CodecError::Truncated`] instead of being routed. Size
    /// `buf` one byte larger than the longest frame to accept.
    ///
    /// Returns `Ok(None)` when the transport had nothing to read.
    ///
    /// # Errors
    ///
    /// Propagates transport receive errors; the caller decides whether they
    /// are fatal.
    pub fn receive_pass(&self, buf: &mut [u8]) -> Result<Option<RouteOutcome>, TransportError> {
        let Some((len, from)) = self.transport.try_receive(buf)? else {
            return Ok(None);
        };
        if len >= buf.len() {
            let limit = buf.len().saturating_sub(1);
            self.counters.frames_received.incr();
            self.counters.decode_errors.incr();
            warn!("dropping datagram from {from}: longer than {limit} bytes");
            return Ok(Some(RouteOutcome::Malformed(CodecError::Truncated { limit })));
        }
        let outcome = route_frame(&buf[..len], self.subscribing, self.counters, self.observer);
        if let RouteOutcome::Malformed(_) = outcome {
            debug!("malformed datagram from {from}");
        }
        Ok(Some(outcome))
    }

    /// Reads every publishing node once, in registration order, and sends
    /// each non-empty payload. Returns the number of frames sent.
    ///
    /// A full send buffer drops the frame and carries on.
    ///
    /// # Errors
    ///
    /// Any other send failure is returned immediately; the rest of the pass
    /// is skipped.
    pub fn publish_pass(&self) -> Result<usize, TransportError> {
        let mut sent = 0;
        for node in self.publishing {
            let Some(payload) = node.read().filter(|p| !p.is_empty()) else {
                continue;
            };
            let frame = match encode_frame(node.name(), &payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(topic = node.name(), "cannot encode payload: {e}");
                    continue;
                }
            };
            match self.transport.send(&frame) {
                Ok(()) => {
                    self.counters.frames_sent.incr();
                    sent += 1;
                }
                Err(e) if e.is_transient() => {
                    debug!(topic = node.name(), "send buffer full, frame dropped");
                }
                Err(e) => {
                    self.counters.io_errors.incr();
                    return Err(e);
                }
            }
        }
        Ok(sent)
    }

    /// Ticks every node of `role` once, in registration order. Returns how
    /// many reported a pending (dirty) value.
    pub fn tick_pass(&self, role: Role) -> usize {
        let registry = match role {
            Role::Publishing => self.publishing,
            Role::Subscribing => self.subscribing,
        };
        registry.iter().filter(|node| node.tick()).count()
    }

    // ── Loops ─────────────────────────────────────────────────────────────────

    /// Receive loop. Receive errors are logged and counted, and the loop
    /// carries on; only a transport that is no longer connected ends it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] if the transport was closed
    /// underneath the loop.
    pub async fn receive_loop(&self) -> Result<(), TransportError> {
        // The spare byte tells a full-size frame from a truncated one.
        let mut buf = vec![0u8; self.recv_buffer_size.saturating_add(1)];
        while self.is_running() {
            match self.receive_pass(&mut buf) {
                Ok(Some(_)) => tokio::task::yield_now().await,
                Ok(None) => self.pause().await,
                Err(TransportError::NotConnected) => {
                    error!("receive loop: transport is not connected, shutting down");
                    self.shutdown();
                    return Err(TransportError::NotConnected);
                }
                Err(e) => {
                    self.counters.io_errors.incr();
                    error!("receive loop: {e}");
                    self.pause().await;
                }
            }
        }
        debug!("receive loop stopped");
        Ok(())
    }

    /// Publish loop. A send failure is fatal for the whole engine.
    ///
    /// # Errors
    ///
    /// Returns the send error that stopped the loop.
    pub async fn publish_loop(&self) -> Result<(), TransportError> {
        while self.is_running() {
            if let Err(e) = self.publish_pass() {
                error!("publish loop: {e}; shutting down engine");
                self.shutdown();
                return Err(e);
            }
            self.pause().await;
        }
        debug!("publish loop stopped");
        Ok(())
    }

    /// Tick loop for one registry: yields, then ticks every node.
    pub async fn tick_loop(&self, role: Role) {
        while self.is_running() {
            self.pause().await;
            if !self.is_running() {
                break;
            }
            self.tick_pass(role);
        }
        debug!("{role} tick loop stopped");
    }

    /// Runs all four loops on the current task until they end.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error reported by the receive or publish loop.
    pub async fn run(&self) -> Result<(), TransportError> {
        let (received, published, (), ()) = tokio::join!(
            self.receive_loop(),
            self.publish_loop(),
            self.tick_loop(Role::Subscribing),
            self.tick_loop(Role::Publishing),
        );
        published.and(received)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
