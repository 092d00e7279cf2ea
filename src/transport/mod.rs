//! Transport glue
//!
//! [`PacketWriter`] is the only thing the dispatcher knows about the socket.
//! With the `transport` feature this module also provides a tokio UDP
//! implementation and a ready-made event loop:
//!
//! ```text
//!            ┌──────────────────────────────┐
//!  readable ─┤                              ├─ process_packet
//!  writable ─┤        DispatchServer        ├─ on_socket_writable
//!     alarm ─┤       (tokio::select!)       ├─ on_alarm
//!  shutdown ─┤                              ├─ shutdown
//!            └──────────────┬───────────────┘
//!                           │ UdpPacketWriter
//!                          UDP
//! ```

mod writer;

#[cfg(feature = "transport")]
mod server;
#[cfg(feature = "transport")]
mod socket;

pub use writer::{PacketWriter, WriteResult};

#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub use server::{DispatchServer, ServerError, MAX_DATAGRAMS_PER_READ};
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub use socket::{UdpPacketWriter, DEFAULT_RECV_BUFFER_SIZE};
