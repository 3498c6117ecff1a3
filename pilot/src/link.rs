use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use log::debug;

use crate::config::LinkConfig;
use crate::error::TransportError;

/// Fire-and-forget delivery of a packet to the drone.
pub trait Link: Send + Sync {
    fn send(&self, packet: &[u8]) -> Result<(), TransportError>;
}

/// Opens a fresh socket for every packet and closes it right after, so concurrent senders never
/// share one.
#[derive(Debug, Clone)]
pub struct UdpLink {
    addr: SocketAddr,
}

impl UdpLink {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.drone)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn bind(&self) -> Result<UdpSocket, TransportError> {
        let local: SocketAddr = match self.addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        UdpSocket::bind(local).map_err(|source| TransportError::Bind {
            addr: self.addr,
            source,
        })
    }
}

impl Link for UdpLink {
    fn send(&self, packet: &[u8]) -> Result<(), TransportError> {
        let socket = self.bind()?;
        socket
            .send_to(packet, self.addr)
            .map_err(|source| TransportError::Send {
                addr: self.addr,
                len: packet.len(),
                source,
            })?;
        debug!("Sent {:02x?} to {}", packet, self.addr);
        Ok(())
    }
}
