//! Packet codec
//!
//! Only the public header and public reset packets are understood here.
//! Payloads are opaque and handed to sessions untouched.

mod header;
mod reset;

pub use header::{ConnectionIdLength, PacketNumberLength, PublicHeader};
pub use reset::{PublicReset, ResetSecret};
