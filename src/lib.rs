//! # quic-dispatcher
//!
//! Server-side connection dispatch for a QUIC-like UDP transport.
//!
//! One UDP socket serves many logical connections. The dispatcher sits
//! between that socket and the per-connection state machines:
//!
//! - **Demultiplexing**: datagrams are routed by connection id to the owning
//!   session, and unknown ids are classified before any state is created
//! - **Time-wait**: ids of closed or rejected connections are answered with
//!   their close packet or a rate-limited public reset for a bounded period
//! - **Backpressure**: when the shared socket blocks, writers queue up and
//!   are resumed round-robin once it drains
//!
//! The core is sans-IO and single-threaded. Time is always passed in.
//!
//! ## Feature Flags
//!
//! - `transport` (default): tokio UDP writer and [`DispatchServer`](transport::DispatchServer)
//!
//! ## Modules
//!
//! - [`core`]: identifiers, constants, and error types
//! - [`packet`]: public header and public reset codec
//! - [`dispatch`]: the dispatcher, sessions, time-wait, and write-blocked queue
//! - [`config`]: dispatcher configuration
//! - [`transport`]: the packet writer abstraction and the tokio event loop
//!
//! ## Example Usage
//!
//! ```rust
//! use std::net::SocketAddr;
//! use std::time::Instant;
//!
//! use quic_dispatcher::prelude::*;
//!
//! struct Echo {
//!     params: SessionParams,
//! }
//!
//! impl Session for Echo {
//!     fn connection_id(&self) -> ConnectionId {
//!         self.params.connection_id
//!     }
//!     fn version(&self) -> Version {
//!         self.params.version
//!     }
//!     fn process_packet(
//!         &mut self,
//!         ctx: &mut SessionContext<'_>,
//!         server: SocketAddr,
//!         client: SocketAddr,
//!         packet: &[u8],
//!     ) {
//!         ctx.write_packet(packet, server.ip(), client);
//!     }
//!     fn close(&mut self, ctx: &mut SessionContext<'_>, error: ErrorCode) {
//!         ctx.notify_closed(error, None);
//!     }
//!     fn on_can_write(&mut self, _ctx: &mut SessionContext<'_>) {}
//!     fn is_write_blocked(&self) -> bool {
//!         false
//!     }
//!     fn is_handshake_confirmed(&self) -> bool {
//!         true
//!     }
//! }
//!
//! struct EchoFactory;
//!
//! impl SessionFactory for EchoFactory {
//!     type Session = Echo;
//!     fn create_session(&mut self, params: SessionParams) -> Echo {
//!         Echo { params }
//!     }
//! }
//!
//! /// Collects datagrams instead of sending them.
//! #[derive(Default)]
//! struct Sink(Vec<Vec<u8>>);
//!
//! impl PacketWriter for Sink {
//!     fn write_packet(&mut self, buf: &[u8], _: std::net::IpAddr, _: SocketAddr) -> WriteResult {
//!         self.0.push(buf.to_vec());
//!         WriteResult::Ok(buf.len())
//!     }
//!     fn is_write_blocked(&self) -> bool {
//!         false
//!     }
//!     fn set_writable(&mut self) {}
//! }
//!
//! let mut dispatcher =
//!     Dispatcher::new(DispatcherConfig::default(), EchoFactory, Sink::default()).unwrap();
//!
//! let header = PublicHeader::new(ConnectionId::new(1), Some(Version::new(2)), PacketNumber::new(1));
//! let packet = header.to_bytes();
//! let server: SocketAddr = "127.0.0.1:4433".parse().unwrap();
//! let client: SocketAddr = "127.0.0.1:50000".parse().unwrap();
//!
//! let fate = dispatcher.process_packet(server, client, &packet, Instant::now());
//! assert_eq!(fate, Dispatched::Created);
//! assert_eq!(dispatcher.writer().0, vec![packet]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod config;
pub mod dispatch;
pub mod packet;

// Writer trait always; tokio pieces behind the `transport` feature
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{DispatcherConfig, DispatcherConfigBuilder};
    pub use crate::core::*;
    pub use crate::dispatch::{
        BlockedWriter, Dispatched, Dispatcher, DispatcherStats, DropReason, Session,
        SessionContext, SessionFactory, SessionParams,
    };
    pub use crate::packet::{PublicHeader, PublicReset, ResetSecret};
    pub use crate::transport::{PacketWriter, WriteResult};

    #[cfg(feature = "transport")]
    pub use crate::transport::{DispatchServer, ServerError, UdpPacketWriter};
}

// Re-export commonly used items at crate root
pub use crate::config::DispatcherConfig;
pub use crate::core::{ConnectionId, ErrorCode, HeaderError, PacketNumber, Version};
pub use crate::dispatch::{Dispatched, Dispatcher, Session, SessionContext, SessionFactory};
pub use crate::transport::{PacketWriter, WriteResult};
