//! What to do with the first packet of an unknown connection.

use crate::core::PacketNumber;
use crate::packet::PublicHeader;

/// Fate of a packet for a connection id nobody knows.
///
/// Ordered by severity. Checks combine with `max`, so a later check can
/// escalate a fate but never soften it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketFate {
    /// Start a new session.
    Process,
    /// Put the id straight into time-wait and answer from there.
    TimeWait,
    /// Ignore the packet.
    Drop,
}

/// Validity checks for connection-initiating packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatePolicy {
    max_reasonable_initial_packet_number: u64,
}

impl FatePolicy {
    /// Accept initial packet numbers in `1..=max_reasonable_initial_packet_number`.
    pub fn new(max_reasonable_initial_packet_number: u64) -> Self {
        Self {
            max_reasonable_initial_packet_number,
        }
    }

    /// Classify `header`, which belongs to an unknown, non-reset connection.
    pub fn decide(&self, header: &PublicHeader) -> PacketFate {
        let mut fate = PacketFate::Process;

        // Without a version this cannot open a connection. Most likely the
        // server forgot the connection (e.g. restarted): reject fast.
        if header.version.is_none() {
            fate = fate.max(PacketFate::TimeWait);
        }

        fate = fate.max(match header.packet_number {
            Some(pn) if self.is_reasonable_initial(pn) => PacketFate::Process,
            Some(_) => PacketFate::TimeWait,
            // Nothing a reset could refer to.
            None => PacketFate::Drop,
        });

        fate
    }

    fn is_reasonable_initial(&self, packet_number: PacketNumber) -> bool {
        !packet_number.is_invalid()
            && packet_number.value() <= self.max_reasonable_initial_packet_number
    }
}
