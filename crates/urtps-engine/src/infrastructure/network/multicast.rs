//! UDP multicast transport.
//!
//! Every peer binds the same port on all interfaces with `SO_REUSEADDR` set,
//! so several peers (or several processes on one host) can share it, then
//! joins the IPv4 multicast group. A frame sent to `group:port` reaches every
//! member, including the sender when multicast loopback is enabled.
//!
//! The socket is put in non-blocking mode: `recv_from` on an empty socket
//! returns `WouldBlock` immediately, which is the steady state of the receive
//! loop and not an error.
//!
//! `socket2` is used to set socket options before `bind`; the result is a
//! plain `std::net::UdpSocket`.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use super::{is_would_block, Transport, TransportError};

/// Opens a UDP socket joined to `group` and bound to `port` on all interfaces.
///
/// # Errors
///
/// - [`TransportError::InvalidGroup`] if `group` is not a multicast address.
/// - [`TransportError::Bind`] if the socket cannot be created, configured or bound.
/// - [`TransportError::JoinGroup`] if the membership cannot be added.
pub fn bind(group: Ipv4Addr, port: u16) -> Result<UdpSocket, TransportError> {
    bind_on(group, port, Ipv4Addr::UNSPECIFIED)
}

/// Like [`bind`], joining the group on a specific local interface.
///
/// # Errors
///
/// See [`bind`].
pub fn bind_on(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> Result<UdpSocket, TransportError> {
    if !group.is_multicast() {
        return Err(TransportError::InvalidGroup(group));
    }

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    let bind_err = |source| TransportError::Bind { addr, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket
        .join_multicast_v4(&group, &interface)
        .map_err(|source| TransportError::JoinGroup { group, source })?;
    socket.set_multicast_loop_v4(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    Ok(socket.into())
}

/// A [`Transport`] backed by a multicast-joined UDP socket.
#[derive(Debug)]
pub struct MulticastTransport {
    group: Ipv4Addr,
    port: u16,
    interface: Ipv4Addr,
    socket: Option<UdpSocket>,
}

impl MulticastTransport {
    /// Creates an unconnected transport for `group:port`.
    pub fn new(group: Ipv4Addr, port: u16) -> Self {
        Self {
            group,
            port,
            interface: Ipv4Addr::UNSPECIFIED,
            socket: None,
        }
    }

    /// Joins the group on `interface` instead of letting the OS choose.
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    /// The multicast destination frames are sent to.
    pub fn destination(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// The bound local address, if connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn socket(&self) -> Result<&UdpSocket, TransportError> {
        self.socket.as_ref().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for MulticastTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = bind_on(self.group, self.port, self.interface)?;
        info!("joined multicast group {}:{}", self.group, self.port);
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        match self.socket()?.send_to(frame, self.destination()) {
            Ok(_) => Ok(()),
            Err(e) if is_would_block(&e) => Err(TransportError::WouldBlock),
            Err(e) => Err(TransportError::Send(e)),
        }
    }

    fn try_receive(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        match self.socket()?.recv_from(buf) {
            Ok(pair) => Ok(Some(pair)),
            Err(e) if is_would_block(&e) => Ok(None),
            Err(e) => Err(TransportError::Receive(e)),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("multicast socket closed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
