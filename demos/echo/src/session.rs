//! Echo session.
//!
//! Every packet's payload is sent back under the same connection id. A
//! payload of `close` ends the connection; the peer then keeps receiving the
//! close packet from time-wait.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;
use quic_dispatcher::prelude::*;

const CLOSE_COMMAND: &[u8] = b"close";

/// One echo connection.
pub struct EchoSession {
    params: SessionParams,
    next_packet_number: u64,
    /// Replies waiting for the socket.
    queued: VecDeque<Bytes>,
    handshake_confirmed: bool,
    stateless_rejects: bool,
}

impl EchoSession {
    fn new(params: SessionParams) -> Self {
        Self {
            params,
            next_packet_number: 1,
            queued: VecDeque::new(),
            handshake_confirmed: false,
            stateless_rejects: false,
        }
    }

    fn build_packet(&mut self, payload: &[u8]) -> Bytes {
        let header = PublicHeader::new(
            self.params.connection_id,
            None,
            PacketNumber::new(self.next_packet_number),
        );
        self.next_packet_number += 1;

        let mut packet = header.to_bytes();
        packet.extend_from_slice(payload);
        Bytes::from(packet)
    }

    fn flush(&mut self, ctx: &mut SessionContext<'_>) {
        while let Some(packet) = self.queued.front() {
            let result = ctx.write_packet(
                packet,
                self.params.server_addr.ip(),
                self.params.client_addr,
            );
            if result.is_blocked() {
                return;
            }
            self.queued.pop_front();
        }
    }
}

impl Session for EchoSession {
    fn connection_id(&self) -> ConnectionId {
        self.params.connection_id
    }

    fn version(&self) -> Version {
        self.params.version
    }

    fn process_packet(
        &mut self,
        ctx: &mut SessionContext<'_>,
        _server_addr: SocketAddr,
        client_addr: SocketAddr,
        packet: &[u8],
    ) {
        let Ok(header) = PublicHeader::decode(packet) else {
            return;
        };
        let payload = &packet[header.encoded_len()..];
        tracing::debug!(
            connection_id = %self.params.connection_id,
            peer = %client_addr,
            len = payload.len(),
            "echo"
        );

        // Busy server: leave the handshake unconfirmed so the dispatcher
        // rejects the client statelessly.
        if self.stateless_rejects && !self.handshake_confirmed {
            return;
        }
        // The first packet from the client stands in for a handshake.
        self.handshake_confirmed = true;
        self.params.client_addr = client_addr;

        if payload == CLOSE_COMMAND {
            self.close(ctx, ErrorCode::NoError);
            return;
        }

        let reply = self.build_packet(payload);
        self.queued.push_back(reply);
        self.flush(ctx);
    }

    fn close(&mut self, ctx: &mut SessionContext<'_>, error: ErrorCode) {
        if error.is_stateless_reject() {
            ctx.notify_closed(error, None);
            return;
        }
        let close_packet = self.build_packet(format!("closed: {error}").as_bytes());
        if !ctx.is_write_blocked() {
            ctx.write_packet(
                &close_packet,
                self.params.server_addr.ip(),
                self.params.client_addr,
            );
        }
        ctx.notify_closed(error, Some(close_packet));
    }

    fn on_can_write(&mut self, ctx: &mut SessionContext<'_>) {
        self.flush(ctx);
    }

    fn is_write_blocked(&self) -> bool {
        !self.queued.is_empty()
    }

    fn is_handshake_confirmed(&self) -> bool {
        self.handshake_confirmed
    }

    fn wants_stateless_reject(&self) -> bool {
        self.stateless_rejects && !self.handshake_confirmed
    }

    fn set_stateless_rejects(&mut self, enabled: bool) {
        self.stateless_rejects = enabled;
    }
}

/// Creates [`EchoSession`]s.
#[derive(Debug, Default)]
pub struct EchoFactory;

impl SessionFactory for EchoFactory {
    type Session = EchoSession;

    fn create_session(&mut self, params: SessionParams) -> EchoSession {
        tracing::info!(
            connection_id = %params.connection_id,
            peer = %params.client_addr,
            version = %params.version,
            "new echo session"
        );
        EchoSession::new(params)
    }
}
