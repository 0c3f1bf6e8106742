//! Network infrastructure for the engine.
//!
//! # Sub-modules
//!
//! - **`multicast`** – [`MulticastTransport`]: a UDP socket with address reuse,
//!   joined to an IPv4 multicast group and switched to non-blocking mode.
//!
//! - **`bootstrap`** – [`Bootstrapped`]: wraps a transport with a platform
//!   network bootstrap step (such as joining a wireless network) that must
//!   finish within a timeout before the socket is opened.
//!
//! - **`loopback`** – an in-memory bus with the same [`Transport`] contract,
//!   used by tests and single-process demos.
//!
//! # Non-blocking contract
//!
//! The scheduler is cooperative, so no transport call may block. `send` and
//! `try_receive` return immediately; an empty socket is reported as
//! `Ok(None)` rather than as an error.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod bootstrap;
pub mod loopback;
pub mod multicast;

pub use bootstrap::{Bootstrapped, NetworkBootstrap};
pub use loopback::{LoopbackBus, LoopbackTransport};
pub use multicast::MulticastTransport;

/// Errors produced by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be created, configured or bound.
    #[error("failed to bind multicast socket on {addr}: {source}")]
    Bind {
        addr: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },
    /// The socket was bound but could not join the group.
    #[error("failed to join multicast group {group}: {source}")]
    JoinGroup {
        group: Ipv4Addr,
        #[source]
        source: std::io::Error,
    },
    /// The configured group is not an IPv4 multicast address.
    #[error("{0} is not an IPv4 multicast address")]
    InvalidGroup(Ipv4Addr),
    /// The platform network bootstrap reported failure.
    #[error("network bootstrap failed: {0}")]
    Bootstrap(String),
    /// The platform network bootstrap did not finish in time.
    #[error("network bootstrap timed out after {0:?}")]
    BootstrapTimeout(Duration),
    /// A datagram could not be sent.
    #[error("send error: {0}")]
    Send(#[source] std::io::Error),
    /// A datagram could not be received for a reason other than an empty socket.
    #[error("recv error: {0}")]
    Receive(#[source] std::io::Error),
    /// The send buffer is full; the frame was not sent.
    #[error("send would block")]
    WouldBlock,
    /// `send`/`try_receive` was called before `connect` or after `close`.
    #[error("transport is not connected")]
    NotConnected,
}

impl TransportError {
    /// `true` for errors after which the transport can keep being used.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::WouldBlock)
    }
}

/// The engine's view of the network.
///
/// Only `connect` is async: it may wait on a platform bootstrap. Every other
/// call returns immediately.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the transport. Called once per engine run, before any loop
    /// starts.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Sends one frame to the group. Best-effort; never retried.
    fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Reads one datagram into `buf` if one is pending.
    ///
    /// Returns `Ok(None)` when there is nothing to read.
    fn try_receive(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransportError>;

    /// Releases the underlying resources. Idempotent.
    fn close(&mut self);
}

/// Returns `true` for OS would-block errors that mean "try again later".
pub(crate) fn is_would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
