//! Platform network bootstrap.
//!
//! Some targets cannot open a socket until the platform has joined a network
//! (an embedded board associating with a wireless access point, for example).
//! [`NetworkBootstrap`] is the hook for that step and [`Bootstrapped`] runs it,
//! bounded by a timeout, before connecting the wrapped transport.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{Transport, TransportError};

/// Brings the platform network up.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkBootstrap: Send + Sync {
    /// Joins the network and returns the local address obtained.
    async fn join(&mut self) -> Result<IpAddr, String>;
}

/// A transport whose `connect` first runs a [`NetworkBootstrap`].
pub struct Bootstrapped<B, T> {
    bootstrap: B,
    inner: T,
    timeout: Duration,
    local_ip: Option<IpAddr>,
}

impl<B: NetworkBootstrap, T: Transport> Bootstrapped<B, T> {
    pub fn new(bootstrap: B, inner: T, timeout: Duration) -> Self {
        Self {
            bootstrap,
            inner,
            timeout,
            local_ip: None,
        }
    }

    /// The address reported by the last successful bootstrap.
    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<B: NetworkBootstrap, T: Transport> Transport for Bootstrapped<B, T> {
    async fn connect(&mut self) -> Result<(), TransportError> {
        debug!("bootstrapping network (timeout {:?})", self.timeout);
        let ip = match tokio::time::timeout(self.timeout, self.bootstrap.join()).await {
            Ok(Ok(ip)) => ip,
            Ok(Err(reason)) => {
                error!("network bootstrap failed: {reason}");
                return Err(TransportError::Bootstrap(reason));
            }
            Err(_) => {
                error!("network bootstrap timed out after {:?}", self.timeout);
                return Err(TransportError::BootstrapTimeout(self.timeout));
            }
        };
        info!("network up at {ip}");
        self.local_ip = Some(ip);
        self.inner.connect().await
    }

    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.inner.send(frame)
    }

    fn try_receive(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, TransportError> {
        self.inner.try_receive(buf)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
