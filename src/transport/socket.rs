//! Tokio UDP implementation of [`PacketWriter`].

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

use super::writer::{PacketWriter, WriteResult};

/// Default receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

/// Non-blocking writer over a shared UDP socket.
///
/// A `WouldBlock` from the kernel marks the writer blocked until
/// [`set_writable`](PacketWriter::set_writable). The socket is bound to a
/// single address, so the `self_address` of each write is not used.
#[derive(Debug)]
pub struct UdpPacketWriter {
    socket: Arc<UdpSocket>,
    blocked: bool,
}

impl UdpPacketWriter {
    /// Wrap a shared socket.
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            blocked: false,
        }
    }

    /// Get a clone of the Arc-wrapped socket.
    pub fn socket_arc(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl PacketWriter for UdpPacketWriter {
    fn write_packet(
        &mut self,
        buf: &[u8],
        _self_address: IpAddr,
        peer_address: SocketAddr,
    ) -> WriteResult {
        if self.blocked {
            return WriteResult::Blocked;
        }
        match self.socket.try_send_to(buf, peer_address) {
            Ok(n) => WriteResult::Ok(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::trace!(peer = %peer_address, "socket write blocked");
                self.blocked = true;
                WriteResult::Blocked
            }
            Err(e) => {
                tracing::debug!(peer = %peer_address, error = %e, "socket write failed");
                WriteResult::Error(e.kind())
            }
        }
    }

    fn is_write_blocked(&self) -> bool {
        self.blocked
    }

    fn set_writable(&mut self) {
        self.blocked = false;
    }
}
