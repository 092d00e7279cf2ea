//! Error types for the dispatcher core.
//!
//! Nothing here crosses the packet-processing boundary as a failure: decode
//! errors end up in a drop, and lifecycle violations go through `dfatal!`.

use thiserror::Error;

/// Errors produced while decoding a public header or public reset.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Buffer ended before the field being read.
    #[error("packet too short: need {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Reserved public flag bits were set.
    #[error("invalid public flags: 0x{0:02x}")]
    InvalidFlags(u8),

    /// A public reset also claimed to carry a version.
    #[error("public reset carries a version")]
    ResetWithVersion,

    /// Unknown address family in a public reset body.
    #[error("invalid address family: {0}")]
    InvalidAddressFamily(u8),
}

/// Errors in dispatcher configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// TOML could not be parsed into a configuration.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Reports a broken lifecycle contract.
///
/// Logs at error level, then asserts in debug builds. Release builds log and
/// carry on, so a bug upstream cannot take the dispatcher down. Takes plain
/// format arguments only.
macro_rules! dfatal {
    ($($arg:tt)+) => {{
        ::tracing::error!($($arg)+);
        debug_assert!(false, $($arg)+);
    }};
}

pub(crate) use dfatal;
