//! In-memory loopback bus.
//!
//! # Why a loopback bus?
//!
//! The real transport depends on the host having a multicast route, which CI
//! sandboxes and containers often lack. [`LoopbackBus`] gives several engines
//! in one process the same delivery model without touching the OS:
//!
//! - Each [`LoopbackTransport`] endpoint has its own inbox while connected.
//! - `send` copies the frame into the inbox of every connected endpoint,
//!   including the sender (like multicast loopback).
//! - Every sent frame is also recorded on the bus so tests can inspect the
//!   exact wire traffic and its order.
//!
//! Both are bounded. A full inbox drops new datagrams, as a full socket
//! receive buffer would, and the sent log keeps only the most recent frames.
//! [`LoopbackBus::with_limits`] sets both capacities.
//!
//! Failure injection: [`LoopbackBus::fail_sends`] makes every later send fail
//! with an I/O error, and [`LoopbackBus::failing_endpoint`] returns an endpoint
//! whose `connect` fails.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Transport, TransportError};

/// Source address reported for frames injected with [`LoopbackBus::inject`].
const INJECT_SOURCE: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1);
/// Endpoint `n` reports frames as coming from `127.0.0.1:(BASE_PORT + n)`.
const BASE_PORT: u16 = 40000;

/// Default number of datagrams an endpoint's inbox holds before new ones are dropped.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;
/// Default number of frames kept by [`LoopbackBus::sent`].
pub const DEFAULT_SENT_LOG_CAPACITY: usize = 1024;

type Datagram = (Vec<u8>, SocketAddr);

struct BusState {
    inboxes: Vec<Option<VecDeque<Datagram>>>,
    sent: VecDeque<Vec<u8>>,
    fail_sends: bool,
    inbox_capacity: usize,
    sent_log_capacity: usize,
}

impl BusState {
    fn deliver(&mut self, frame: &[u8], from: SocketAddr) {
        let capacity = self.inbox_capacity;
        for inbox in self.inboxes.iter_mut().flatten() {
            if inbox.len() < capacity {
                inbox.push_back((frame.to_vec(), from));
            }
        }
    }

    fn record_sent(&mut self, frame: &[u8]) {
        if self.sent_log_capacity == 0 {
            return;
        }
        if self.sent.len() == self.sent_log_capacity {
            self.sent.pop_front();
        }
        self.sent.push_back(frame.to_vec());
    }
}

/// A shared in-memory medium. Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct LoopbackBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::with_limits(DEFAULT_INBOX_CAPACITY, DEFAULT_SENT_LOG_CAPACITY)
    }
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus whose inboxes hold at most `inbox_capacity` datagrams
    /// and whose sent log keeps the last `sent_log_capacity` frames. A
    /// `sent_log_capacity` of 0 disables the log.
    pub fn with_limits(inbox_capacity: usize, sent_log_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                inboxes: Vec::new(),
                sent: VecDeque::new(),
                fail_sends: false,
                inbox_capacity,
                sent_log_capacity,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a new, unconnected endpoint on this bus.
    pub fn endpoint(&self) -> LoopbackTransport {
        let id = {
            let mut state = self.state();
            state.inboxes.push(None);
            state.inboxes.len() - 1
        };
        LoopbackTransport {
            bus: self.clone(),
            id,
            connected: false,
            fail_connect: false,
        }
    }

    /// Creates an endpoint whose `connect` always fails.
    pub fn failing_endpoint(&self) -> LoopbackTransport {
        LoopbackTransport {
            fail_connect: true,
            ..self.endpoint()
        }
    }

    /// Delivers `frame` to every connected endpoint as if a remote peer sent it.
    /// Injected frames are not recorded in [`sent`](Self::sent).
    pub fn inject(&self, frame: &[u8]) {
        self.state().deliver(frame, SocketAddr::V4(INJECT_SOURCE));
    }

    /// Makes every later `send` fail (`true`) or succeed again (`false`).
    pub fn fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    /// The most recent frames sent through any endpoint, in send order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.iter().cloned().collect()
    }

    /// [`sent`](Self::sent) as text.
    pub fn sent_text(&self) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    /// Number of datagrams waiting in endpoint `id`'s inbox.
    pub fn pending(&self, endpoint: &LoopbackTransport) -> usize {
        self.state()
            .inboxes
            .get(endpoint.id)
            .and_then(Option::as_ref)
            .map_or(0, VecDeque::len)
    }

    /// Number of endpoints currently connected to the bus.
    pub fn connected_endpoints(&self) -> usize {
        self.state().inboxes.iter().flatten().count()
    }
}

/// One endpoint on a [`LoopbackBus`].
pub struct LoopbackTransport {
    bus: LoopbackBus,
    id: usize,
    connected: bool,
    fail_connect: bool,
}

impl LoopbackTransport {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The address other endpoints see as this endpoint's source.
    pub fn local_addr(&self) -> SocketAddr {
        let port = BASE_PORT.saturating_add(u16::try_from(self.id).unwrap_or(u16::MAX));
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.fail_connect {
            return Err(TransportError::Bind {
                addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "loopback endpoint configured to fail",
                ),
            });
        }
        let mut state = self.bus.state();
        if let Some(slot) = state.inboxes.get_mut(self.id) {
            slot.get_or_insert_with(VecDeque::new);
        }
        self.connected = true;
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let mut state = self.bus.state();
        if state.fail_sends {
            return Err(TransportError::Send(std::io::Error::new(
                std::io::ErrorKind::NetworkUnreachable,
                "loopback send failure injected",
            )));
        }
        state.record_sent(frame);
        state.deliver(frame, self.local_addr());
        Ok(())
    }

    fn try_receive(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let mut state = self.bus.state();
        let next = state
            .inboxes
            .get_mut(self.id)
            .and_then(Option::as_mut)
            .and_then(VecDeque::pop_front);
        Ok(next.map(|(frame, from)| {
            // Like UDP, a datagram longer than the buffer is truncated.
            let len = frame.len().min(buf.len());
            buf[..len].copy_from_slice(&frame[..len]);
            (len, from)
        }))
    }

    fn close(&mut self) {
        if !self.connected {
            return;
        }
        if let Some(slot) = self.bus.state().inboxes.get_mut(self.id) {
            *slot = None;
        }
        self.connected = false;
    }
}
