//! Protocol and dispatcher constants.
//!
//! Wire layout values are fixed by the packet format. Timing and capacity
//! values are only defaults; the live values come from
//! [`DispatcherConfig`](crate::config::DispatcherConfig).

use std::time::Duration;

use super::types::Version;

// =============================================================================
// WIRE LAYOUT
// =============================================================================

/// Public flag: a version tag follows the connection id.
pub const FLAG_VERSION: u8 = 0x01;

/// Public flag: the packet is a public reset.
pub const FLAG_RESET: u8 = 0x02;

/// Mask of the two bits encoding the connection id length.
pub const FLAG_CONNECTION_ID_MASK: u8 = 0x0C;

/// Mask of the two bits encoding the packet number length.
pub const FLAG_PACKET_NUMBER_MASK: u8 = 0x30;

/// Reserved public flag bits, must be zero.
pub const FLAG_RESERVED_MASK: u8 = 0xC0;

/// Full connection id size on the wire.
pub const CONNECTION_ID_SIZE: usize = 8;

/// Version tag size on the wire.
pub const VERSION_SIZE: usize = 4;

/// Reset nonce proof size.
pub const NONCE_PROOF_SIZE: usize = 8;

/// Largest packet number representable in the 6-byte encoding.
pub const MAX_PACKET_NUMBER: u64 = (1 << 48) - 1;

// =============================================================================
// VERSIONS
// =============================================================================

/// Versions this implementation speaks, most preferred first.
pub const SUPPORTED_VERSIONS: &[Version] = &[Version::new(2), Version::new(1)];

// =============================================================================
// DISPATCHER DEFAULTS
// =============================================================================

/// Highest packet number a client may use before hearing from the server.
pub const MAX_REASONABLE_INITIAL_PACKET_NUMBER: u64 = 100;

/// How long a closed connection id stays in time-wait.
pub const DEFAULT_TIME_WAIT_PERIOD: Duration = Duration::from_secs(5);

/// Longest accepted time-wait period.
pub const MAX_TIME_WAIT_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum number of connection ids held in time-wait at once.
pub const DEFAULT_MAX_TIME_WAIT_CONNECTIONS: usize = 5000;
