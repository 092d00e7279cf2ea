//! Shared packet writer abstraction.

use std::io;
use std::net::{IpAddr, SocketAddr};

/// Outcome of a single write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// Datagram handed to the socket.
    Ok(usize),
    /// Socket cannot accept more data right now. Nothing was written.
    Blocked,
    /// Write failed for another reason. The datagram is lost.
    Error(io::ErrorKind),
}

impl WriteResult {
    /// Check if the write was refused because the socket is blocked.
    pub fn is_blocked(&self) -> bool {
        matches!(self, WriteResult::Blocked)
    }
}

/// The outbound half of the shared UDP socket.
///
/// Every session and the time-wait registry write through one
/// `PacketWriter`. Once a write returns [`WriteResult::Blocked`] the writer
/// stays blocked until [`set_writable`](PacketWriter::set_writable) is
/// called by whoever observes the socket becoming writable again.
pub trait PacketWriter {
    /// Send one datagram from `self_address` to `peer_address`.
    fn write_packet(
        &mut self,
        buf: &[u8],
        self_address: IpAddr,
        peer_address: SocketAddr,
    ) -> WriteResult;

    /// Check if the last write left the socket blocked.
    fn is_write_blocked(&self) -> bool;

    /// Clear the blocked state.
    fn set_writable(&mut self);
}
