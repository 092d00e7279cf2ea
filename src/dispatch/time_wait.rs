//! Time-wait registry.
//!
//! Connection ids the server no longer serves stay here for a bounded
//! period. Stray packets for them get either the connection's close packet
//! again or a public reset, rate limited with exponential backoff, so that
//! clients fail fast without the server rebuilding any state.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;

use super::write_blocked::{BlockedWriter, WriteBlockedQueue};
use crate::core::{dfatal, ConnectionId, PacketNumber, Version};
use crate::packet::{PublicReset, ResetSecret};
use crate::transport::{PacketWriter, WriteResult};

/// Per-id time-wait state.
#[derive(Debug, Clone)]
struct TimeWaitEntry {
    version: Version,
    insertion_time: Instant,
    received_packet_count: u64,
    close_packet: Option<Bytes>,
    stateless_rejected: bool,
}

/// Outbound packet waiting for the socket.
#[derive(Debug, Clone)]
struct PendingPacket {
    server_addr: IpAddr,
    client_addr: SocketAddr,
    bytes: Bytes,
}

/// What the registry did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWaitResponse {
    /// The stored close packet was sent (or queued) again.
    ReplayedClose,
    /// A fresh public reset was sent (or queued).
    PublicReset,
    /// Nothing was sent.
    Suppressed,
}

/// Registry of connection ids in time-wait.
///
/// Entries are kept in insertion order. The oldest entry is the first to
/// expire and the first to be evicted when the registry is full.
#[derive(Debug)]
pub struct TimeWaitRegistry {
    entries: LruCache<ConnectionId, TimeWaitEntry>,
    pending: VecDeque<PendingPacket>,
    time_wait_period: Duration,
    max_connections: usize,
    next_alarm: Option<Instant>,
    reset_secret: ResetSecret,
}

impl TimeWaitRegistry {
    /// Create an empty registry.
    pub fn new(time_wait_period: Duration, max_connections: usize, reset_secret: ResetSecret) -> Self {
        Self {
            entries: LruCache::unbounded(),
            pending: VecDeque::new(),
            time_wait_period,
            max_connections,
            next_alarm: None,
            reset_secret,
        }
    }

    /// Put `connection_id` into time-wait.
    ///
    /// Adding an id that is already present re-arms it: the old entry is
    /// replaced and moves to the newest position. Returns the ids evicted to
    /// keep the registry within capacity.
    pub fn add(
        &mut self,
        connection_id: ConnectionId,
        version: Version,
        stateless_rejected: bool,
        close_packet: Option<Bytes>,
        now: Instant,
    ) -> Vec<ConnectionId> {
        if self.entries.pop(&connection_id).is_some() {
            tracing::debug!(connection_id = %connection_id, "re-arming time-wait entry");
        }

        self.entries.push(
            connection_id,
            TimeWaitEntry {
                version,
                insertion_time: now,
                received_packet_count: 0,
                close_packet,
                stateless_rejected,
            },
        );
        tracing::debug!(
            connection_id = %connection_id,
            %version,
            stateless_rejected,
            "added to time-wait"
        );

        let mut evicted = Vec::new();
        while self.entries.len() > self.max_connections {
            let Some((id, _)) = self.entries.pop_lru() else {
                break;
            };
            tracing::debug!(connection_id = %id, "evicted from time-wait at capacity");
            evicted.push(id);
        }

        self.reschedule_alarm();
        evicted
    }

    /// Check if `connection_id` is in time-wait.
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.entries.contains(&connection_id)
    }

    /// Number of ids in time-wait.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Version last used with `connection_id`.
    pub fn version_for(&self, connection_id: ConnectionId) -> Option<Version> {
        self.entries.peek(&connection_id).map(|entry| entry.version)
    }

    /// Packets received for `connection_id` since it entered time-wait.
    pub fn received_packet_count(&self, connection_id: ConnectionId) -> Option<u64> {
        self.entries
            .peek(&connection_id)
            .map(|entry| entry.received_packet_count)
    }

    /// Check if outbound packets are waiting for the socket.
    pub fn has_pending_packets(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Deadline of the single outstanding expiry alarm.
    pub fn next_alarm(&self) -> Option<Instant> {
        self.next_alarm
    }

    /// Exponential backoff: answer only on the 1st, 2nd, 4th, 8th, ... packet.
    pub fn should_send_response(received_packet_count: u64) -> bool {
        received_packet_count.is_power_of_two()
    }

    /// Handle a packet for an id in time-wait.
    pub fn process_packet(
        &mut self,
        writer: &mut dyn PacketWriter,
        blocked: &mut WriteBlockedQueue,
        server_addr: IpAddr,
        client_addr: SocketAddr,
        connection_id: ConnectionId,
        packet_number: PacketNumber,
    ) -> TimeWaitResponse {
        let Some(entry) = self.entries.peek_mut(&connection_id) else {
            dfatal!("packet for connection {} which is not in time-wait", connection_id);
            return TimeWaitResponse::Suppressed;
        };
        entry.received_packet_count += 1;
        let count = entry.received_packet_count;

        let (bytes, response) = if let Some(close_packet) = &entry.close_packet {
            (close_packet.clone(), TimeWaitResponse::ReplayedClose)
        } else if entry.stateless_rejected {
            tracing::trace!(connection_id = %connection_id, count, "stateless reject, not replying");
            return TimeWaitResponse::Suppressed;
        } else if Self::should_send_response(count) {
            let reset = PublicReset::new(
                &self.reset_secret,
                connection_id,
                packet_number,
                entry.version,
                client_addr,
            );
            (reset.encode(), TimeWaitResponse::PublicReset)
        } else {
            tracing::trace!(connection_id = %connection_id, count, "backing off");
            return TimeWaitResponse::Suppressed;
        };

        tracing::trace!(connection_id = %connection_id, count, ?response, "time-wait reply");
        self.send_or_queue(
            writer,
            blocked,
            PendingPacket {
                server_addr,
                client_addr,
                bytes,
            },
        );
        response
    }

    /// Flush queued packets, oldest first, until the socket blocks again.
    pub fn on_can_write(&mut self, writer: &mut dyn PacketWriter, blocked: &mut WriteBlockedQueue) {
        while let Some(packet) = self.pending.front() {
            if writer.is_write_blocked() {
                blocked.register(BlockedWriter::TimeWait);
                return;
            }
            match writer.write_packet(&packet.bytes, packet.server_addr, packet.client_addr) {
                WriteResult::Ok(_) => {}
                WriteResult::Blocked => {
                    blocked.register(BlockedWriter::TimeWait);
                    return;
                }
                WriteResult::Error(kind) => {
                    tracing::debug!(peer = %packet.client_addr, ?kind, "dropping time-wait packet");
                }
            }
            self.pending.pop_front();
        }
    }

    /// Remove every entry whose time-wait period has elapsed at `now`.
    ///
    /// Returns the removed ids, oldest first, and re-arms the alarm for the
    /// oldest remaining entry.
    pub fn expire_old_entries(&mut self, now: Instant) -> Vec<ConnectionId> {
        let mut expired = Vec::new();
        while let Some((_, entry)) = self.entries.peek_lru() {
            // A deadline past the clock's range never comes.
            match entry.insertion_time.checked_add(self.time_wait_period) {
                Some(deadline) if deadline <= now => {}
                _ => break,
            }
            if let Some((id, _)) = self.entries.pop_lru() {
                tracing::debug!(connection_id = %id, "time-wait expired");
                expired.push(id);
            }
        }
        self.reschedule_alarm();
        expired
    }

    fn reschedule_alarm(&mut self) {
        self.next_alarm = self
            .entries
            .peek_lru()
            .and_then(|(_, entry)| entry.insertion_time.checked_add(self.time_wait_period));
    }

    fn send_or_queue(
        &mut self,
        writer: &mut dyn PacketWriter,
        blocked: &mut WriteBlockedQueue,
        packet: PendingPacket,
    ) {
        // Queue behind earlier packets so ours never reorder.
        if writer.is_write_blocked() || !self.pending.is_empty() {
            self.pending.push_back(packet);
            blocked.register(BlockedWriter::TimeWait);
            return;
        }

        match writer.write_packet(&packet.bytes, packet.server_addr, packet.client_addr) {
            WriteResult::Ok(_) => {}
            WriteResult::Blocked => {
                self.pending.push_back(packet);
                blocked.register(BlockedWriter::TimeWait);
            }
            WriteResult::Error(kind) => {
                tracing::debug!(peer = %packet.client_addr, ?kind, "dropping time-wait packet");
            }
        }
    }
}
