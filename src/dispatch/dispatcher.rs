//! Connection dispatcher.
//!
//! The dispatcher is the single entry point for inbound datagrams on a
//! server socket. It owns every session, decides what to do with packets for
//! unknown connection ids, and arbitrates the shared socket when it blocks.
//!
//! It performs no I/O of its own. The caller feeds it datagrams, writable
//! notifications and alarms, passing the current time explicitly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use super::fate::{FatePolicy, PacketFate};
use super::session::{Session, SessionContext, SessionEvent, SessionFactory, SessionParams};
use super::time_wait::{TimeWaitRegistry, TimeWaitResponse};
use super::write_blocked::{BlockedWriter, WriteBlockedQueue};
use crate::config::DispatcherConfig;
use crate::core::{
    dfatal, ConfigError, ConnectionId, ErrorCode, HeaderError, PacketNumber, Version,
};
use crate::packet::{PublicHeader, ResetSecret};
use crate::transport::PacketWriter;

/// Why a packet was dropped without touching any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Public header could not be decoded.
    Undecodable,
    /// Client port 0, no reply could be addressed.
    ZeroPort,
    /// Connection id shorter than 8 bytes.
    TruncatedConnectionId,
    /// Public reset for a connection id nobody knows.
    UnknownReset,
    /// Validity checks rejected the first packet of a connection.
    Rejected,
}

/// Where a packet ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dispatched {
    /// Delivered to an existing session.
    Session,
    /// A new session was created for it.
    Created,
    /// Handled by the time-wait registry.
    TimeWait,
    /// Dropped.
    Dropped(DropReason),
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Datagrams passed to `process_packet`.
    pub packets_received: u64,
    /// Datagrams dropped without reaching a session or time-wait.
    pub packets_dropped: u64,
    /// Sessions created.
    pub sessions_created: u64,
    /// Sessions closed.
    pub sessions_closed: u64,
    /// Ids added to time-wait.
    pub time_wait_added: u64,
    /// Ids evicted from time-wait at capacity.
    pub time_wait_evicted: u64,
    /// Ids expired from time-wait.
    pub time_wait_expired: u64,
    /// Public resets sent or queued.
    pub public_resets: u64,
    /// Close packets sent or queued again.
    pub close_packets_replayed: u64,
}

/// Server-side connection dispatcher.
pub struct Dispatcher<F: SessionFactory, W: PacketWriter> {
    config: DispatcherConfig,
    preferred_version: Version,
    fate_policy: FatePolicy,
    factory: F,
    sessions: HashMap<ConnectionId, F::Session>,
    /// Closed sessions awaiting [`Dispatcher::delete_sessions`].
    closed_sessions: Vec<F::Session>,
    time_wait: TimeWaitRegistry,
    write_blocked: WriteBlockedQueue,
    writer: W,
    last_error: Option<HeaderError>,
    stats: DispatcherStats,
}

impl<F: SessionFactory, W: PacketWriter> Dispatcher<F, W> {
    /// Create a dispatcher with a fresh random reset secret.
    pub fn new(config: DispatcherConfig, factory: F, writer: W) -> Result<Self, ConfigError> {
        Self::with_reset_secret(config, factory, writer, ResetSecret::generate())
    }

    /// Create a dispatcher that derives reset proofs from `reset_secret`.
    pub fn with_reset_secret(
        config: DispatcherConfig,
        factory: F,
        writer: W,
        reset_secret: ResetSecret,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let preferred_version =
            config
                .preferred_version()
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "supported_versions",
                    reason: "must list at least one version".to_string(),
                })?;

        Ok(Self {
            preferred_version,
            fate_policy: FatePolicy::new(config.max_reasonable_initial_packet_number),
            time_wait: TimeWaitRegistry::new(
                config.time_wait_period,
                config.max_time_wait_connections,
                reset_secret,
            ),
            config,
            factory,
            sessions: HashMap::new(),
            closed_sessions: Vec::new(),
            write_blocked: WriteBlockedQueue::new(),
            writer,
            last_error: None,
            stats: DispatcherStats::default(),
        })
    }

    /// Route one inbound datagram.
    pub fn process_packet(
        &mut self,
        server_addr: SocketAddr,
        client_addr: SocketAddr,
        packet: &[u8],
        now: Instant,
    ) -> Dispatched {
        self.stats.packets_received += 1;

        let header = match PublicHeader::decode(packet) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(peer = %client_addr, error = %e, "undecodable public header");
                self.last_error = Some(e);
                return self.drop_packet(DropReason::Undecodable);
            }
        };

        if client_addr.port() == 0 {
            return self.drop_packet(DropReason::ZeroPort);
        }
        if !header.has_full_connection_id() {
            return self.drop_packet(DropReason::TruncatedConnectionId);
        }

        let connection_id = header.connection_id;

        if self.sessions.contains_key(&connection_id) {
            self.call_session(connection_id, now, |session, ctx| {
                session.process_packet(ctx, server_addr, client_addr, packet)
            });
            return Dispatched::Session;
        }

        if header.reset {
            tracing::trace!(connection_id = %connection_id, "public reset for unknown connection");
            return self.drop_packet(DropReason::UnknownReset);
        }

        if self.time_wait.contains(connection_id) {
            self.deliver_to_time_wait(server_addr, client_addr, &header);
            return Dispatched::TimeWait;
        }

        match self.fate_policy.decide(&header) {
            PacketFate::Process => {
                self.create_session(&header, server_addr, client_addr, packet, now);
                Dispatched::Created
            }
            PacketFate::TimeWait => {
                tracing::debug!(
                    connection_id = %connection_id,
                    version = ?header.version,
                    packet_number = ?header.packet_number,
                    "rejecting unknown connection into time-wait"
                );
                let version = self.select_version(header.version);
                self.add_to_time_wait(connection_id, version, false, None, now);
                self.deliver_to_time_wait(server_addr, client_addr, &header);
                Dispatched::TimeWait
            }
            PacketFate::Drop => self.drop_packet(DropReason::Rejected),
        }
    }

    /// The shared socket is writable again.
    ///
    /// Serves each writer registered before this call at most once, in
    /// registration order, stopping as soon as the socket blocks again.
    pub fn on_socket_writable(&mut self, now: Instant) {
        self.writer.set_writable();

        WriteBlockedQueue::drain_in(
            self,
            |d| &mut d.write_blocked,
            |d| d.writer.is_write_blocked(),
            |d, writer| d.serve_blocked_writer(writer, now),
        );
    }

    fn serve_blocked_writer(&mut self, writer: BlockedWriter, now: Instant) {
        match writer {
            BlockedWriter::TimeWait => {
                self.time_wait
                    .on_can_write(&mut self.writer, &mut self.write_blocked);
            }
            BlockedWriter::Session(connection_id) => {
                let served = self.call_session(connection_id, now, |session, ctx| {
                    session.on_can_write(ctx)
                });
                if served.is_none() {
                    tracing::trace!(connection_id = %connection_id, "blocked session is gone");
                }
            }
        }
    }

    /// Register `writer` to be called back once the socket is writable.
    ///
    /// Registering while the socket is writable is a lifecycle error: the
    /// writer would be woken immediately and spin.
    pub fn on_write_blocked(&mut self, writer: BlockedWriter) {
        if !self.writer.is_write_blocked() {
            dfatal!("{:?} reported write blocked while the socket is writable", writer);
            return;
        }
        self.write_blocked.register(writer);
    }

    /// Tear down a session and move its id into time-wait.
    ///
    /// Sessions normally get here through [`SessionContext::notify_closed`].
    /// `close_packet` is ignored for stateless rejects.
    pub fn on_connection_closed(
        &mut self,
        connection_id: ConnectionId,
        error: ErrorCode,
        close_packet: Option<Bytes>,
        now: Instant,
    ) {
        let Some(session) = self.sessions.remove(&connection_id) else {
            dfatal!("close for unknown connection {}: {}", connection_id, error);
            return;
        };

        self.write_blocked
            .unregister(BlockedWriter::Session(connection_id));

        let stateless = error.is_stateless_reject();
        let close_packet = if stateless && close_packet.is_some() {
            tracing::warn!(
                connection_id = %connection_id,
                "discarding close packet of a stateless reject"
            );
            None
        } else {
            close_packet
        };

        tracing::debug!(connection_id = %connection_id, %error, "connection closed");
        self.stats.sessions_closed += 1;
        self.add_to_time_wait(connection_id, session.version(), stateless, close_packet, now);
        self.closed_sessions.push(session);
    }

    /// Check if any writer is waiting for the socket.
    pub fn has_pending_writes(&self) -> bool {
        !self.write_blocked.is_empty()
    }

    /// Drop sessions closed since the last call.
    pub fn delete_sessions(&mut self) {
        if !self.closed_sessions.is_empty() {
            tracing::trace!(count = self.closed_sessions.len(), "deleting closed sessions");
            self.closed_sessions.clear();
        }
    }

    /// Close every session for server shutdown.
    ///
    /// Sessions that do not report closure are left in the table.
    pub fn shutdown(&mut self, now: Instant) {
        let ids: Vec<ConnectionId> = self.sessions.keys().copied().collect();
        tracing::info!(sessions = ids.len(), "dispatcher shutting down");

        for connection_id in ids {
            self.call_session(connection_id, now, |session, ctx| {
                session.close(ctx, ErrorCode::PeerGoingAway)
            });
            if self.sessions.contains_key(&connection_id) {
                tracing::warn!(
                    connection_id = %connection_id,
                    "session did not close on shutdown, leaking it"
                );
            }
        }

        self.delete_sessions();
    }

    /// Run time-wait expiry. Returns the expired ids.
    pub fn on_alarm(&mut self, now: Instant) -> Vec<ConnectionId> {
        let expired = self.time_wait.expire_old_entries(now);
        self.stats.time_wait_expired += expired.len() as u64;
        expired
    }

    /// Deadline for the next [`on_alarm`](Self::on_alarm) call.
    pub fn next_alarm(&self) -> Option<Instant> {
        self.time_wait.next_alarm()
    }

    /// Most recent header decode error.
    pub fn last_error(&self) -> Option<&HeaderError> {
        self.last_error.as_ref()
    }

    /// Counters.
    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    /// Look up an active session.
    pub fn session(&self, connection_id: ConnectionId) -> Option<&F::Session> {
        self.sessions.get(&connection_id)
    }

    /// Look up an active session mutably.
    pub fn session_mut(&mut self, connection_id: ConnectionId) -> Option<&mut F::Session> {
        self.sessions.get_mut(&connection_id)
    }

    /// Number of active sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of closed sessions not yet deleted.
    pub fn closed_session_count(&self) -> usize {
        self.closed_sessions.len()
    }

    /// The time-wait registry.
    pub fn time_wait(&self) -> &TimeWaitRegistry {
        &self.time_wait
    }

    /// The shared writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// The shared writer, mutably.
    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// The session factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn drop_packet(&mut self, reason: DropReason) -> Dispatched {
        tracing::trace!(?reason, "dropping packet");
        self.stats.packets_dropped += 1;
        Dispatched::Dropped(reason)
    }

    fn select_version(&self, offered: Option<Version>) -> Version {
        match offered {
            Some(version) if self.config.supports(version) => version,
            _ => self.preferred_version,
        }
    }

    fn create_session(
        &mut self,
        header: &PublicHeader,
        server_addr: SocketAddr,
        client_addr: SocketAddr,
        packet: &[u8],
        now: Instant,
    ) {
        let connection_id = header.connection_id;
        let params = SessionParams {
            connection_id,
            server_addr,
            client_addr,
            version: self.select_version(header.version),
            offered_version: header.version,
        };

        let mut session = self.factory.create_session(params);
        if let Some(threshold) = self.config.stateless_reject_threshold {
            if self.sessions.len() >= threshold {
                session.set_stateless_rejects(true);
            }
        }

        tracing::debug!(
            connection_id = %connection_id,
            peer = %client_addr,
            version = %params.version,
            "created session"
        );
        self.sessions.insert(connection_id, session);
        self.stats.sessions_created += 1;

        self.call_session(connection_id, now, |session, ctx| {
            session.process_packet(ctx, server_addr, client_addr, packet)
        });

        let reject = self.sessions.get(&connection_id).is_some_and(|session| {
            session.wants_stateless_reject() && !session.is_handshake_confirmed()
        });
        if reject {
            tracing::debug!(connection_id = %connection_id, "rejecting statelessly");
            self.call_session(connection_id, now, |session, ctx| {
                session.close(ctx, ErrorCode::StatelessReject)
            });
        }
    }

    fn add_to_time_wait(
        &mut self,
        connection_id: ConnectionId,
        version: Version,
        stateless: bool,
        close_packet: Option<Bytes>,
        now: Instant,
    ) {
        let evicted = self
            .time_wait
            .add(connection_id, version, stateless, close_packet, now);
        self.stats.time_wait_added += 1;
        self.stats.time_wait_evicted += evicted.len() as u64;
    }

    fn deliver_to_time_wait(
        &mut self,
        server_addr: SocketAddr,
        client_addr: SocketAddr,
        header: &PublicHeader,
    ) {
        let response = self.time_wait.process_packet(
            &mut self.writer,
            &mut self.write_blocked,
            server_addr.ip(),
            client_addr,
            header.connection_id,
            header.packet_number.unwrap_or(PacketNumber::INVALID),
        );
        match response {
            TimeWaitResponse::PublicReset => self.stats.public_resets += 1,
            TimeWaitResponse::ReplayedClose => self.stats.close_packets_replayed += 1,
            TimeWaitResponse::Suppressed => {}
        }
    }

    /// Run `f` against a session, then act on what it reported.
    ///
    /// Returns `None` if the session does not exist.
    fn call_session<R>(
        &mut self,
        connection_id: ConnectionId,
        now: Instant,
        f: impl FnOnce(&mut F::Session, &mut SessionContext<'_>) -> R,
    ) -> Option<R> {
        let session = self.sessions.get_mut(&connection_id)?;
        let mut events = Vec::new();
        let result = {
            let mut ctx = SessionContext::new(connection_id, &mut self.writer, &mut events);
            f(session, &mut ctx)
        };

        for event in events {
            match event {
                SessionEvent::Closed {
                    error,
                    close_packet,
                } => self.on_connection_closed(connection_id, error, close_packet, now),
                SessionEvent::WriteBlocked => {
                    if self.sessions.contains_key(&connection_id) {
                        self.on_write_blocked(BlockedWriter::Session(connection_id));
                    }
                }
            }
        }

        Some(result)
    }
}

impl<F: SessionFactory, W: PacketWriter> std::fmt::Debug for Dispatcher<F, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("sessions", &self.sessions.len())
            .field("closed_sessions", &self.closed_sessions.len())
            .field("time_wait", &self.time_wait.len())
            .field("write_blocked", &self.write_blocked.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{
        client_addr, packet, server_addr, MockFactory, MockWriter, OnPacket,
    };
    use crate::packet::PublicReset;
    use proptest::prelude::*;
    use std::time::Duration;

    type TestDispatcher = Dispatcher<MockFactory, MockWriter>;

    fn dispatcher_with(config: DispatcherConfig, factory: MockFactory) -> TestDispatcher {
        Dispatcher::with_reset_secret(
            config,
            factory,
            MockWriter::new(),
            ResetSecret::from_bytes([1u8; 32]),
        )
        .unwrap()
    }

    fn dispatcher(factory: MockFactory) -> TestDispatcher {
        dispatcher_with(DispatcherConfig::default(), factory)
    }

    fn id(n: u64) -> ConnectionId {
        ConnectionId::new(n)
    }

    fn deliver(d: &mut TestDispatcher, bytes: &[u8], now: Instant) -> Dispatched {
        d.process_packet(server_addr(), client_addr(), bytes, now)
    }

    fn assert_disjoint(d: &TestDispatcher, ids: &[u64]) {
        for &n in ids {
            assert!(
                !(d.session(id(n)).is_some() && d.time_wait().contains(id(n))),
                "connection {n} is both active and in time-wait"
            );
        }
    }

    #[test]
    fn test_new_connection_creates_session() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        let bytes = packet(1, Some(2), 1);

        assert_eq!(deliver(&mut d, &bytes, now), Dispatched::Created);
        assert_eq!(d.session_count(), 1);

        let session = d.session(id(1)).unwrap();
        assert_eq!(session.packets, vec![bytes]);
        assert_eq!(session.version, Version::new(2));
        assert_eq!(session.client_addr, client_addr());
        assert_eq!(d.stats().sessions_created, 1);
    }

    #[test]
    fn test_known_connection_is_forwarded() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        deliver(&mut d, &packet(1, Some(2), 1), now);

        // Later packets drop the version and may carry any packet number.
        assert_eq!(deliver(&mut d, &packet(1, None, 500), now), Dispatched::Session);
        assert_eq!(d.session(id(1)).unwrap().packets.len(), 2);
        assert_eq!(d.factory().created.len(), 1);
    }

    #[test]
    fn test_unsupported_version_uses_preferred() {
        let mut d = dispatcher(MockFactory::default());
        deliver(&mut d, &packet(1, Some(99), 1), Instant::now());
        deliver(&mut d, &packet(2, Some(1), 1), Instant::now());

        let created = &d.factory().created;
        assert_eq!(created[0].version, Version::new(2));
        assert_eq!(created[0].offered_version, Some(Version::new(99)));
        assert_eq!(created[1].version, Version::new(1));
    }

    #[test]
    fn test_missing_version_goes_to_time_wait() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();

        assert_eq!(deliver(&mut d, &packet(5, None, 1), now), Dispatched::TimeWait);
        assert_eq!(d.session_count(), 0);
        assert_eq!(d.time_wait().len(), 1);
        assert_eq!(d.time_wait().received_packet_count(id(5)), Some(1));

        assert_eq!(d.writer().written.len(), 1);
        let reset = PublicReset::decode(&d.writer().written[0].bytes).unwrap();
        assert_eq!(reset.connection_id, id(5));
        assert_eq!(reset.rejected_packet_number, PacketNumber::new(1));
        assert_eq!(d.stats().public_resets, 1);
    }

    #[test]
    fn test_unreasonable_packet_numbers_go_to_time_wait() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();

        assert_eq!(deliver(&mut d, &packet(1, Some(2), 0), now), Dispatched::TimeWait);
        assert_eq!(deliver(&mut d, &packet(2, Some(2), 101), now), Dispatched::TimeWait);
        assert_eq!(deliver(&mut d, &packet(3, Some(2), 100), now), Dispatched::Created);
        assert_eq!(d.session_count(), 1);
        assert_eq!(d.time_wait().len(), 2);
    }

    #[test]
    fn test_time_wait_packets_are_not_revived() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        deliver(&mut d, &packet(5, None, 1), now);

        // A perfectly valid initial packet for the same id stays in time-wait.
        assert_eq!(deliver(&mut d, &packet(5, Some(2), 1), now), Dispatched::TimeWait);
        assert_eq!(d.session_count(), 0);
        assert_eq!(d.time_wait().received_packet_count(id(5)), Some(2));
    }

    #[test]
    fn test_pre_dispatch_drops() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();

        let zero_port: SocketAddr = "10.0.0.2:0".parse().unwrap();
        assert_eq!(
            d.process_packet(server_addr(), zero_port, &packet(1, Some(2), 1), now),
            Dispatched::Dropped(DropReason::ZeroPort)
        );

        let mut truncated = PublicHeader::new(id(2), Some(Version::new(2)), PacketNumber::new(1));
        truncated.connection_id_length = crate::packet::ConnectionIdLength::Four;
        assert_eq!(
            deliver(&mut d, &truncated.to_bytes(), now),
            Dispatched::Dropped(DropReason::TruncatedConnectionId)
        );

        let reset = PublicHeader::reset(id(3)).to_bytes();
        assert_eq!(
            deliver(&mut d, &reset, now),
            Dispatched::Dropped(DropReason::UnknownReset)
        );

        assert_eq!(d.session_count(), 0);
        assert!(d.time_wait().is_empty());
        assert!(d.writer().written.is_empty());
        assert_eq!(d.stats().packets_dropped, 3);
    }

    #[test]
    fn test_undecodable_packet_records_error() {
        let mut d = dispatcher(MockFactory::default());

        assert_eq!(
            deliver(&mut d, &[0x0C, 1, 2], Instant::now()),
            Dispatched::Dropped(DropReason::Undecodable)
        );
        assert!(matches!(d.last_error(), Some(HeaderError::TooShort { .. })));
        assert_eq!(d.session_count(), 0);
    }

    #[test]
    fn test_session_closing_on_first_packet() {
        let factory = MockFactory {
            on_packet: OnPacket::Close(ErrorCode::NoError),
            ..Default::default()
        };
        let mut d = dispatcher(factory);
        let now = Instant::now();

        assert_eq!(deliver(&mut d, &packet(1, Some(2), 1), now), Dispatched::Created);
        assert_eq!(d.session_count(), 0);
        assert!(d.time_wait().contains(id(1)));
        assert_eq!(d.closed_session_count(), 1);
        assert_disjoint(&d, &[1]);

        d.delete_sessions();
        assert_eq!(d.closed_session_count(), 0);

        // Stray packets get the close packet again, byte for byte.
        assert_eq!(deliver(&mut d, &packet(1, None, 2), now), Dispatched::TimeWait);
        assert_eq!(deliver(&mut d, &packet(1, None, 3), now), Dispatched::TimeWait);
        let close = format!("close {}", id(1)).into_bytes();
        assert_eq!(d.writer().written.len(), 2);
        assert!(d.writer().written.iter().all(|w| w.bytes == close));
        assert_eq!(d.stats().close_packets_replayed, 2);
    }

    #[test]
    fn test_session_closing_later_does_not_recreate() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        deliver(&mut d, &packet(1, Some(2), 1), now);
        d.session_mut(id(1)).unwrap().on_packet = OnPacket::Close(ErrorCode::IdleTimeout);

        assert_eq!(deliver(&mut d, &packet(1, Some(2), 2), now), Dispatched::Session);
        assert_eq!(d.session_count(), 0);
        assert!(d.time_wait().contains(id(1)));
        assert_eq!(d.factory().created.len(), 1);
        assert_eq!(d.time_wait().version_for(id(1)), Some(Version::new(2)));
    }

    #[test]
    fn test_stateless_reject_on_first_packet() {
        let factory = MockFactory {
            wants_stateless_reject: true,
            ..Default::default()
        };
        let mut d = dispatcher(factory);
        let now = Instant::now();

        assert_eq!(deliver(&mut d, &packet(1, Some(2), 1), now), Dispatched::Created);
        assert_eq!(d.session_count(), 0);
        assert!(d.time_wait().contains(id(1)));

        // Stateless rejects are never answered from time-wait.
        for pn in 2..10 {
            deliver(&mut d, &packet(1, None, pn), now);
        }
        assert!(d.writer().written.is_empty());
    }

    #[test]
    fn test_no_stateless_reject_after_handshake() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        deliver(&mut d, &packet(1, Some(2), 1), now);

        let session = d.session_mut(id(1)).unwrap();
        session.handshake_confirmed = true;
        session.wants_stateless_reject = true;

        // Only the first packet can trigger a stateless reject.
        deliver(&mut d, &packet(1, None, 2), now);
        assert_eq!(d.session_count(), 1);
    }

    #[test]
    fn test_stateless_close_discards_close_packet() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        deliver(&mut d, &packet(1, Some(2), 1), now);

        d.on_connection_closed(
            id(1),
            ErrorCode::StatelessReject,
            Some(Bytes::from_static(b"reject")),
            now,
        );
        deliver(&mut d, &packet(1, None, 2), now);
        assert!(d.writer().written.is_empty());
    }

    #[test]
    fn test_stateless_reject_threshold() {
        let config = DispatcherConfig::builder()
            .stateless_reject_threshold(2)
            .build()
            .unwrap();
        let mut d = dispatcher_with(config, MockFactory::default());
        let now = Instant::now();

        for n in 1..=3 {
            deliver(&mut d, &packet(n, Some(2), 1), now);
        }
        assert!(!d.session(id(1)).unwrap().stateless_rejects);
        assert!(!d.session(id(2)).unwrap().stateless_rejects);
        assert!(d.session(id(3)).unwrap().stateless_rejects);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn test_close_unknown_connection() {
        let mut d = dispatcher(MockFactory::default());
        d.on_connection_closed(id(42), ErrorCode::NoError, None, Instant::now());
        assert!(d.time_wait().is_empty());
    }

    fn blocked_sessions(count: u64) -> TestDispatcher {
        let factory = MockFactory {
            on_packet: OnPacket::Reply,
            ..Default::default()
        };
        let mut d = dispatcher(factory);
        d.writer_mut().block();
        for n in 1..=count {
            deliver(&mut d, &packet(n, Some(2), 1), Instant::now());
        }
        d
    }

    fn reply_order(d: &TestDispatcher) -> Vec<String> {
        d.writer()
            .written
            .iter()
            .map(|w| String::from_utf8(w.bytes.clone()).unwrap())
            .collect()
    }

    #[test]
    fn test_on_socket_writable_serves_in_order() {
        let mut d = blocked_sessions(3);
        assert!(d.has_pending_writes());
        assert!(d.writer().written.is_empty());

        d.on_socket_writable(Instant::now());
        assert!(!d.has_pending_writes());
        assert_eq!(
            reply_order(&d),
            (1..=3).map(|n| format!("reply {}", id(n))).collect::<Vec<_>>()
        );
        for n in 1..=3 {
            assert_eq!(d.session(id(n)).unwrap().can_write_calls, 1);
        }
    }

    #[test]
    fn test_on_socket_writable_stops_when_blocked() {
        let mut d = blocked_sessions(3);

        // First writer blocks the socket again.
        d.writer_mut().block_next(1);
        d.on_socket_writable(Instant::now());
        assert!(d.writer().written.is_empty());
        assert_eq!(d.session(id(1)).unwrap().can_write_calls, 1);
        assert_eq!(d.session(id(2)).unwrap().can_write_calls, 0);

        // Session 1 re-registered behind the others.
        d.on_socket_writable(Instant::now());
        assert_eq!(
            reply_order(&d),
            [2, 3, 1].map(|n| format!("reply {}", id(n))).to_vec()
        );
        assert!(!d.has_pending_writes());
    }

    #[test]
    fn test_duplicate_write_blocked_registration() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        deliver(&mut d, &packet(1, Some(2), 1), now);

        d.writer_mut().block();
        d.on_write_blocked(BlockedWriter::Session(id(1)));
        d.on_write_blocked(BlockedWriter::Session(id(1)));

        d.on_socket_writable(now);
        assert_eq!(d.session(id(1)).unwrap().can_write_calls, 1);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn test_write_blocked_while_writable() {
        let mut d = dispatcher(MockFactory::default());
        d.on_write_blocked(BlockedWriter::TimeWait);
        assert!(!d.has_pending_writes());
    }

    #[test]
    fn test_closed_session_leaves_write_blocked_queue() {
        let mut d = blocked_sessions(2);
        let now = Instant::now();

        d.session_mut(id(1)).unwrap().on_packet = OnPacket::Close(ErrorCode::NoError);
        deliver(&mut d, &packet(1, None, 2), now);
        d.delete_sessions();

        d.on_socket_writable(now);
        assert_eq!(reply_order(&d), vec![format!("reply {}", id(2))]);
    }

    #[test]
    fn test_blocked_time_wait_reset_is_flushed() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        d.writer_mut().block();

        assert_eq!(deliver(&mut d, &packet(9, None, 1), now), Dispatched::TimeWait);
        assert!(d.has_pending_writes());
        assert!(d.writer().written.is_empty());

        d.on_socket_writable(now);
        assert!(!d.has_pending_writes());
        assert_eq!(d.writer().written.len(), 1);
        let reset = PublicReset::decode(&d.writer().written[0].bytes).unwrap();
        assert_eq!(reset.connection_id, id(9));
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        for n in 1..=3 {
            deliver(&mut d, &packet(n, Some(2), 1), now);
        }

        d.shutdown(now);
        assert_eq!(d.session_count(), 0);
        assert_eq!(d.closed_session_count(), 0);
        for n in 1..=3 {
            assert!(d.time_wait().contains(id(n)));
        }
        assert_eq!(d.stats().sessions_closed, 3);
    }

    #[test]
    fn test_shutdown_leaks_unresponsive_session() {
        let mut d = dispatcher(MockFactory::default());
        let now = Instant::now();
        deliver(&mut d, &packet(1, Some(2), 1), now);
        deliver(&mut d, &packet(2, Some(2), 1), now);
        d.session_mut(id(2)).unwrap().ignore_close = true;

        d.shutdown(now);
        assert!(d.session(id(1)).is_none());
        assert!(d.session(id(2)).is_some());
        assert!(!d.time_wait().contains(id(2)));
    }

    #[test]
    fn test_alarm_expires_time_wait() {
        let mut d = dispatcher(MockFactory::default());
        let t0 = Instant::now();
        deliver(&mut d, &packet(1, None, 1), t0);
        deliver(&mut d, &packet(2, None, 1), t0 + Duration::from_secs(2));

        let period = d.config().time_wait_period;
        assert_eq!(d.next_alarm(), Some(t0 + period));
        assert_eq!(d.on_alarm(t0 + period), vec![id(1)]);
        assert_eq!(d.next_alarm(), Some(t0 + Duration::from_secs(2) + period));

        // An expired id is unknown again and can start a new connection.
        assert_eq!(deliver(&mut d, &packet(1, Some(2), 1), t0 + period), Dispatched::Created);
        assert_eq!(d.stats().time_wait_expired, 1);
    }

    #[test]
    fn test_time_wait_capacity() {
        let config = DispatcherConfig::builder()
            .max_time_wait_connections(2)
            .build()
            .unwrap();
        let mut d = dispatcher_with(config, MockFactory::default());
        let now = Instant::now();
        for n in 1..=3 {
            deliver(&mut d, &packet(n, None, 1), now);
        }
        assert_eq!(d.time_wait().len(), 2);
        assert!(!d.time_wait().contains(id(1)));
        assert_eq!(d.stats().time_wait_evicted, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DispatcherConfig {
            max_time_wait_connections: 0,
            ..Default::default()
        };
        assert!(Dispatcher::new(config, MockFactory::default(), MockWriter::new()).is_err());

        let config = DispatcherConfig {
            time_wait_period: Duration::MAX,
            ..Default::default()
        };
        assert!(Dispatcher::new(config, MockFactory::default(), MockWriter::new()).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Initial(u64),
        Unversioned(u64),
        Close(u64),
        Tick(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..8).prop_map(Op::Initial),
            (0u64..8).prop_map(Op::Unversioned),
            (0u64..8).prop_map(Op::Close),
            (0u64..3000).prop_map(Op::Tick),
        ]
    }

    proptest! {
        #[test]
        fn prop_active_and_time_wait_are_disjoint(ops in prop::collection::vec(op(), 1..200)) {
            let config = DispatcherConfig::builder()
                .max_time_wait_connections(4)
                .time_wait_period(Duration::from_secs(1))
                .build()
                .unwrap();
            let mut d = dispatcher_with(config, MockFactory::default());
            let mut now = Instant::now();

            for op in ops {
                match op {
                    Op::Initial(n) => {
                        deliver(&mut d, &packet(n, Some(2), 1), now);
                    }
                    Op::Unversioned(n) => {
                        deliver(&mut d, &packet(n, None, 7), now);
                    }
                    Op::Close(n) => {
                        if d.session(id(n)).is_some() {
                            d.on_connection_closed(id(n), ErrorCode::NoError, None, now);
                        }
                    }
                    Op::Tick(ms) => {
                        now += Duration::from_millis(ms);
                        d.on_alarm(now);
                    }
                }
                d.delete_sessions();

                for n in 0..8 {
                    prop_assert!(!(d.session(id(n)).is_some() && d.time_wait().contains(id(n))));
                }
                prop_assert!(d.time_wait().len() <= 4);
            }
        }
    }
}
