//! Per-connection state machines as seen by the dispatcher.
//!
//! The dispatcher owns every session. A session never holds a reference back
//! into the dispatcher; it reports closure and backpressure through the
//! [`SessionContext`] it is handed for the duration of each callback, and the
//! dispatcher acts on those reports once the callback has returned.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

use crate::core::{ConnectionId, ErrorCode, Version};
use crate::transport::{PacketWriter, WriteResult};

/// Something a session reported during a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection is finished.
    Closed {
        /// Why it closed.
        error: ErrorCode,
        /// Bytes to replay to the peer while the id sits in time-wait.
        close_packet: Option<Bytes>,
    },
    /// The session has data to send but the socket is blocked.
    WriteBlocked,
}

/// Handle passed to every [`Session`] callback.
pub struct SessionContext<'a> {
    connection_id: ConnectionId,
    writer: &'a mut dyn PacketWriter,
    events: &'a mut Vec<SessionEvent>,
}

impl<'a> SessionContext<'a> {
    pub(crate) fn new(
        connection_id: ConnectionId,
        writer: &'a mut dyn PacketWriter,
        events: &'a mut Vec<SessionEvent>,
    ) -> Self {
        Self {
            connection_id,
            writer,
            events,
        }
    }

    /// Connection id of the session being called.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Write through the shared socket.
    ///
    /// A [`WriteResult::Blocked`] result registers the session for
    /// `on_can_write` automatically.
    pub fn write_packet(
        &mut self,
        buf: &[u8],
        self_address: IpAddr,
        peer_address: SocketAddr,
    ) -> WriteResult {
        let result = self.writer.write_packet(buf, self_address, peer_address);
        if result.is_blocked() {
            self.notify_write_blocked();
        }
        result
    }

    /// Check if the shared socket is blocked.
    pub fn is_write_blocked(&self) -> bool {
        self.writer.is_write_blocked()
    }

    /// Ask to be called back once the socket is writable.
    pub fn notify_write_blocked(&mut self) {
        if !self.events.contains(&SessionEvent::WriteBlocked) {
            self.events.push(SessionEvent::WriteBlocked);
        }
    }

    /// Report that the connection is closed.
    ///
    /// `close_packet` is what the peer should keep receiving while the id
    /// is in time-wait. It is discarded for stateless rejects.
    pub fn notify_closed(&mut self, error: ErrorCode, close_packet: Option<Bytes>) {
        self.events.push(SessionEvent::Closed {
            error,
            close_packet,
        });
    }
}

/// A connection state machine owned by the dispatcher.
pub trait Session {
    /// Connection id this session serves.
    fn connection_id(&self) -> ConnectionId;

    /// Negotiated protocol version.
    fn version(&self) -> Version;

    /// Handle one inbound datagram.
    fn process_packet(
        &mut self,
        ctx: &mut SessionContext<'_>,
        server_addr: SocketAddr,
        client_addr: SocketAddr,
        packet: &[u8],
    );

    /// Close the connection. Must call [`SessionContext::notify_closed`].
    fn close(&mut self, ctx: &mut SessionContext<'_>, error: ErrorCode);

    /// The socket is writable again.
    fn on_can_write(&mut self, ctx: &mut SessionContext<'_>);

    /// Check if the session still has data waiting for the socket.
    fn is_write_blocked(&self) -> bool;

    /// Check if the handshake has completed and encryption is established.
    fn is_handshake_confirmed(&self) -> bool;

    /// Check if the session decided to reject the peer statelessly.
    fn wants_stateless_reject(&self) -> bool {
        false
    }

    /// Enable or disable stateless rejects for this session's handshake.
    fn set_stateless_rejects(&mut self, _enabled: bool) {}
}

/// Parameters for a newly accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Connection id from the first packet.
    pub connection_id: ConnectionId,
    /// Local address the first packet arrived on.
    pub server_addr: SocketAddr,
    /// Peer address.
    pub client_addr: SocketAddr,
    /// Version to speak. Taken from the packet when supported.
    pub version: Version,
    /// Version the client put on its first packet, supported or not.
    pub offered_version: Option<Version>,
}

/// Creates sessions for connections the dispatcher accepts.
pub trait SessionFactory {
    /// Session type produced.
    type Session: Session;

    /// Build the session for a new connection.
    fn create_session(&mut self, params: SessionParams) -> Self::Session;
}
