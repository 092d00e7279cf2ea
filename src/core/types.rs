//! Identifiers shared by the codec, the dispatcher and sessions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection identifier (64-bit).
///
/// Unique among active sessions and time-wait entries at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a connection id from its integer value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Generate a random connection id.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Get the integer value.
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Wire representation (8 bytes, little-endian).
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Parse from the 8-byte wire representation.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<ConnectionId> for u64 {
    fn from(id: ConnectionId) -> u64 {
        id.0
    }
}

/// Packet number from the public header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PacketNumber(u64);

impl PacketNumber {
    /// The invalid packet number. Clients start counting at 1.
    pub const INVALID: Self = Self(0);

    /// Create a packet number.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the integer value.
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Check if this is the invalid packet number.
    pub const fn is_invalid(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol version tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u32);

impl Version {
    /// Create a version from its tag value.
    pub const fn new(tag: u32) -> Self {
        Self(tag)
    }

    /// Get the tag value.
    pub const fn tag(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Reason a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Clean close.
    NoError,
    /// The server is going away.
    PeerGoingAway,
    /// Peer sent a public reset.
    PublicReset,
    /// Handshake rejected without keeping handshake state.
    StatelessReject,
    /// Peer sent a packet whose header could not be processed.
    InvalidPacketHeader,
    /// Handshake did not complete in time.
    HandshakeTimeout,
    /// No traffic for too long.
    IdleTimeout,
    /// Internal failure in the connection state machine.
    Internal,
}

impl ErrorCode {
    /// Check if this closure rejected the peer statelessly.
    pub fn is_stateless_reject(self) -> bool {
        self == ErrorCode::StatelessReject
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "no error",
            ErrorCode::PeerGoingAway => "peer going away",
            ErrorCode::PublicReset => "public reset",
            ErrorCode::StatelessReject => "stateless reject",
            ErrorCode::InvalidPacketHeader => "invalid packet header",
            ErrorCode::HandshakeTimeout => "handshake timeout",
            ErrorCode::IdleTimeout => "idle timeout",
            ErrorCode::Internal => "internal error",
        };
        f.write_str(name)
    }
}
