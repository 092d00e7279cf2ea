//! Scripted writer and sessions shared by the dispatch tests.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

use super::{Session, SessionContext, SessionFactory, SessionParams};
use crate::core::{ConnectionId, ErrorCode, PacketNumber, Version};
use crate::packet::PublicHeader;
use crate::transport::{PacketWriter, WriteResult};

/// One datagram that reached the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub bytes: Vec<u8>,
    pub self_address: IpAddr,
    pub peer_address: SocketAddr,
}

/// In-memory writer. Results are taken from `script` first, then `Ok`.
#[derive(Debug, Default)]
pub struct MockWriter {
    pub written: Vec<Written>,
    pub script: VecDeque<WriteResult>,
    pub blocked: bool,
    pub attempts: usize,
}

impl MockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes report `Blocked`.
    pub fn block_next(&mut self, n: usize) {
        self.script.extend(std::iter::repeat_n(WriteResult::Blocked, n));
    }

    pub fn fail_next(&mut self, kind: io::ErrorKind) {
        self.script.push_back(WriteResult::Error(kind));
    }

    pub fn block(&mut self) {
        self.blocked = true;
    }
}

impl PacketWriter for MockWriter {
    fn write_packet(
        &mut self,
        buf: &[u8],
        self_address: IpAddr,
        peer_address: SocketAddr,
    ) -> WriteResult {
        self.attempts += 1;
        if self.blocked {
            return WriteResult::Blocked;
        }
        match self.script.pop_front().unwrap_or(WriteResult::Ok(buf.len())) {
            WriteResult::Ok(n) => {
                self.written.push(Written {
                    bytes: buf.to_vec(),
                    self_address,
                    peer_address,
                });
                WriteResult::Ok(n)
            }
            WriteResult::Blocked => {
                self.blocked = true;
                WriteResult::Blocked
            }
            other => other,
        }
    }

    fn is_write_blocked(&self) -> bool {
        self.blocked
    }

    fn set_writable(&mut self) {
        self.blocked = false;
    }
}

pub fn server_addr() -> SocketAddr {
    "127.0.0.1:443".parse().unwrap()
}

pub fn client_addr() -> SocketAddr {
    "10.0.0.2:5000".parse().unwrap()
}

/// Encode a packet with a full connection id and a short payload.
pub fn packet(id: u64, version: Option<u32>, packet_number: u64) -> Vec<u8> {
    let header = PublicHeader::new(
        ConnectionId::new(id),
        version.map(Version::new),
        PacketNumber::new(packet_number),
    );
    let mut out = header.to_bytes();
    out.extend_from_slice(b"payload");
    out
}

/// What a mock session does when it receives a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnPacket {
    /// Record and return.
    #[default]
    Nothing,
    /// Close with the given code, sending a close packet.
    Close(ErrorCode),
    /// Try to write a reply.
    Reply,
}

/// Scripted session. Every callback is recorded.
#[derive(Debug)]
pub struct MockSession {
    pub connection_id: ConnectionId,
    pub version: Version,
    pub server_addr: SocketAddr,
    pub client_addr: SocketAddr,
    pub packets: Vec<Vec<u8>>,
    pub on_packet: OnPacket,
    pub can_write_calls: usize,
    pub pending_writes: usize,
    pub handshake_confirmed: bool,
    pub stateless_rejects: bool,
    pub wants_stateless_reject: bool,
    pub closed: Option<ErrorCode>,
    /// Ignore `close` entirely, simulating a session that never reports.
    pub ignore_close: bool,
}

impl MockSession {
    pub fn close_packet(&self) -> Bytes {
        Bytes::from(format!("close {}", self.connection_id))
    }

    fn flush(&mut self, ctx: &mut SessionContext<'_>) {
        while self.pending_writes > 0 {
            let reply = format!("reply {}", self.connection_id);
            match ctx.write_packet(reply.as_bytes(), self.server_addr.ip(), self.client_addr) {
                WriteResult::Blocked => return,
                _ => self.pending_writes -= 1,
            }
        }
    }
}

impl Session for MockSession {
    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn process_packet(
        &mut self,
        ctx: &mut SessionContext<'_>,
        _server_addr: SocketAddr,
        _client_addr: SocketAddr,
        packet: &[u8],
    ) {
        self.packets.push(packet.to_vec());
        match self.on_packet {
            OnPacket::Nothing => {}
            OnPacket::Close(code) => self.close(ctx, code),
            OnPacket::Reply => {
                self.pending_writes += 1;
                self.flush(ctx);
            }
        }
    }

    fn close(&mut self, ctx: &mut SessionContext<'_>, error: ErrorCode) {
        if self.ignore_close || self.closed.is_some() {
            return;
        }
        self.closed = Some(error);
        let close_packet = (!error.is_stateless_reject()).then(|| self.close_packet());
        ctx.notify_closed(error, close_packet);
    }

    fn on_can_write(&mut self, ctx: &mut SessionContext<'_>) {
        self.can_write_calls += 1;
        self.flush(ctx);
    }

    fn is_write_blocked(&self) -> bool {
        self.pending_writes > 0
    }

    fn is_handshake_confirmed(&self) -> bool {
        self.handshake_confirmed
    }

    fn wants_stateless_reject(&self) -> bool {
        self.wants_stateless_reject
    }

    fn set_stateless_rejects(&mut self, enabled: bool) {
        self.stateless_rejects = enabled;
    }
}

/// Factory that stamps out [`MockSession`]s with a fixed behaviour.
#[derive(Debug, Default)]
pub struct MockFactory {
    pub on_packet: OnPacket,
    pub wants_stateless_reject: bool,
    pub created: Vec<SessionParams>,
}

impl SessionFactory for MockFactory {
    type Session = MockSession;

    fn create_session(&mut self, params: SessionParams) -> MockSession {
        self.created.push(params);
        MockSession {
            connection_id: params.connection_id,
            version: params.version,
            server_addr: params.server_addr,
            client_addr: params.client_addr,
            packets: Vec::new(),
            on_packet: self.on_packet,
            can_write_calls: 0,
            pending_writes: 0,
            handshake_confirmed: false,
            stateless_rejects: false,
            wants_stateless_reject: self.wants_stateless_reject,
            closed: None,
            ignore_close: false,
        }
    }
}
