//! Single-threaded event loop around a [`Dispatcher`].

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::net::UdpSocket;

use super::socket::{UdpPacketWriter, DEFAULT_RECV_BUFFER_SIZE};
use super::writer::PacketWriter;
use crate::config::DispatcherConfig;
use crate::core::ConfigError;
use crate::dispatch::{Dispatcher, SessionFactory};

/// Datagrams read per readable event before the other events get a turn.
pub const MAX_DATAGRAMS_PER_READ: usize = 64;

/// Errors that can occur in the dispatch server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid dispatcher configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A UDP server feeding one socket into a [`Dispatcher`].
///
/// # Example
///
/// ```ignore
/// use quic_dispatcher::prelude::*;
///
/// let mut server = DispatchServer::bind(
///     "0.0.0.0:4433".parse()?,
///     DispatcherConfig::default(),
///     MySessionFactory::default(),
/// )
/// .await?;
///
/// server.run_until(tokio::signal::ctrl_c()).await?;
/// ```
pub struct DispatchServer<F: SessionFactory> {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    dispatcher: Dispatcher<F, UdpPacketWriter>,
    recv_buffer: Vec<u8>,
}

impl<F: SessionFactory> DispatchServer<F> {
    /// Bind to an address.
    pub async fn bind(
        addr: SocketAddr,
        config: DispatcherConfig,
        factory: F,
    ) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(addr).await?;
        Self::from_socket(socket, config, factory)
    }

    /// Serve an existing UDP socket.
    pub fn from_socket(
        socket: UdpSocket,
        config: DispatcherConfig,
        factory: F,
    ) -> Result<Self, ServerError> {
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let writer = UdpPacketWriter::new(Arc::clone(&socket));
        let dispatcher = Dispatcher::new(config, factory, writer)?;

        Ok(Self {
            socket,
            local_addr,
            dispatcher,
            recv_buffer: vec![0u8; DEFAULT_RECV_BUFFER_SIZE],
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher<F, UdpPacketWriter> {
        &self.dispatcher
    }

    /// The dispatcher, mutably.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<F, UdpPacketWriter> {
        &mut self.dispatcher
    }

    /// Run until the process is killed.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until `shutdown` completes, then close every session.
    ///
    /// Each iteration waits for one of: inbound datagrams, the socket
    /// becoming writable (only while blocked), the time-wait alarm, or
    /// shutdown. At most [`MAX_DATAGRAMS_PER_READ`] datagrams are read per
    /// iteration. Closed sessions are deleted after every event.
    ///
    /// Sessions are also closed when a socket error ends the loop.
    pub async fn run_until<S>(&mut self, shutdown: S) -> Result<(), ServerError>
    where
        S: Future,
    {
        tracing::info!(addr = %self.local_addr, "dispatch server listening");
        let socket = Arc::clone(&self.socket);
        tokio::pin!(shutdown);

        loop {
            let blocked = self.dispatcher.writer().is_write_blocked()
                || self.dispatcher.has_pending_writes();
            let alarm = self.dispatcher.next_alarm();
            let deadline = tokio::time::Instant::from_std(alarm.unwrap_or_else(Instant::now));

            tokio::select! {
                _ = &mut shutdown => {
                    self.dispatcher.shutdown(Instant::now());
                    tracing::info!("dispatch server stopped");
                    return Ok(());
                }
                readable = socket.readable() => {
                    let result = readable
                        .map_err(ServerError::from)
                        .and_then(|()| self.read_datagrams());
                    if let Err(e) = result {
                        return Err(self.abort(e));
                    }
                }
                writable = socket.writable(), if blocked => {
                    if let Err(e) = writable {
                        return Err(self.abort(e.into()));
                    }
                    self.dispatcher.on_socket_writable(Instant::now());
                }
                _ = tokio::time::sleep_until(deadline), if alarm.is_some() => {
                    self.dispatcher.on_alarm(Instant::now());
                }
            }

            self.dispatcher.delete_sessions();
        }
    }

    /// Close every session after a fatal socket error.
    fn abort(&mut self, error: ServerError) -> ServerError {
        tracing::error!(error = %error, "dispatch server failed, closing sessions");
        self.dispatcher.shutdown(Instant::now());
        self.dispatcher.delete_sessions();
        error
    }

    /// Feed queued datagrams to the dispatcher, up to one batch.
    fn read_datagrams(&mut self) -> Result<(), ServerError> {
        for _ in 0..MAX_DATAGRAMS_PER_READ {
            match self.socket.try_recv_from(&mut self.recv_buffer) {
                Ok((len, peer)) => {
                    self.dispatcher.process_packet(
                        self.local_addr,
                        peer,
                        &self.recv_buffer[..len],
                        Instant::now(),
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                // ICMP errors from an earlier send surface here on some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
