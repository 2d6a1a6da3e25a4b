//! Host network address.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use crate::device::{DeviceError, ScalarSource};
use crate::storage::FieldValue;

/// Address probed to pick the outbound interface. Nothing is sent to it.
pub const DEFAULT_PROBE: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 80));

/// Reports the local IPv4 address used for outbound traffic.
///
/// "Connecting" a UDP socket only selects a route, so this works offline as
/// long as a default route exists.
#[derive(Debug, Clone)]
pub struct HostAddress {
    probe: SocketAddr,
}

impl HostAddress {
    pub fn new(probe: SocketAddr) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> SocketAddr {
        self.probe
    }
}

impl Default for HostAddress {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE)
    }
}

impl ScalarSource for HostAddress {
    fn read(&mut self) -> Result<FieldValue, DeviceError> {
        let bind: SocketAddr = if self.probe.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(self.probe)?;
        let local = socket.local_addr()?;
        Ok(FieldValue::Text(local.ip().to_string()))
    }
}
