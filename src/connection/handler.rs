//! Connection Handler
//!
//! Each client gets its own task running [`ConnectionHandler::run`], a loop
//! that reads bytes, parses requests, executes them and writes responses.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, handler task spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Parse every complete request│◄──┐
//!    │  Execute, buffer response    │   │
//!    │  Flush responses             │   │
//!    │  Read more bytes             │───┘
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. Peer closes / I/O error / protocol error / shutdown
//!        │
//!        ▼
//! 4. Socket dropped, task ends
//! ```
//!
//! Requests on one connection are answered strictly in arrival order.
//! Command errors are ordinary replies; a protocol error gets a best-effort
//! error reply and then closes the connection.

use crate::commands::CommandHandler;
use crate::protocol::{FrameProgress, ParseError, Request, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent bytes that are not a valid request
    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),

    /// The peer closed the connection in the middle of a request
    #[error("connection closed with {0} unparsed bytes")]
    UnexpectedEof(usize),

    /// A single request grew past the allowed size
    #[error("request exceeds {0} bytes")]
    BufferFull(usize),
}

/// Handles a single client connection.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes received but not yet parsed
    buffer: BytesMut,

    command_handler: CommandHandler,

    parser: RespParser,

    /// How far the request at the front of `buffer` has been parsed
    progress: FrameProgress,

    /// Flips to `true` when the server shuts down
    shutdown: Option<watch::Receiver<bool>>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    pub fn new(stream: S, addr: SocketAddr, command_handler: CommandHandler) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            progress: FrameProgress::new(),
            shutdown: None,
        }
    }

    /// Stops the connection between requests once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Replaces the request parser (for custom size limits).
    pub fn with_parser(mut self, parser: RespParser) -> Self {
        self.parser = parser;
        self
    }

    /// Runs the connection until the peer disconnects or an error occurs.
    ///
    /// Returns `Ok(())` on a clean close or server shutdown.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");
        self.main_loop().await
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut responded = false;

            while let Some(request) = self.try_parse_request().await? {
                let response = self.command_handler.execute(request);
                self.write_response(&response).await?;
                responded = true;
            }

            // One flush per batch of pipelined requests
            if responded {
                self.stream.flush().await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Parses one request from the buffer, if a complete one is there.
    ///
    /// On malformed input the client is told why before the error is returned.
    async fn try_parse_request(&mut self) -> Result<Option<Request>, ConnectionError> {
        match self.parser.scan(&self.buffer, &mut self.progress) {
            Ok(Some(consumed)) => {
                let request = self.progress.take_request(&self.buffer);
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(request))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Protocol error, closing connection");
                let reply = RespValue::error(format!("Protocol error: {}", e));
                // Best effort: the peer may already be gone
                if self.write_response(&reply).await.is_ok() {
                    let _ = self.stream.flush().await;
                }
                Err(ConnectionError::Parse(e))
            }
        }
    }

    /// Reads more bytes into the buffer.
    ///
    /// Returns `false` when the connection should end cleanly: the peer
    /// closed it between requests, or the server is shutting down.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        let limit = self.parser.max_request_size();
        if self.buffer.len() >= limit {
            return Err(ConnectionError::BufferFull(limit));
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = tokio::select! {
            read = self.stream.get_mut().read_buf(&mut self.buffer) => read?,
            _ = wait_for_shutdown(&mut self.shutdown) => {
                debug!(client = %self.addr, "Closing connection for shutdown");
                return Ok(false);
            }
        };

        if n == 0 {
            if self.buffer.is_empty() {
                return Ok(false);
            }
            return Err(ConnectionError::UnexpectedEof(self.buffer.len()));
        }

        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(true)
    }

    async fn write_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        trace!(client = %self.addr, bytes = bytes.len(), "Queued response");
        Ok(())
    }
}

/// Resolves once the shutdown flag is set. Never resolves without a receiver
/// or after the sender is gone.
async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = shutdown {
        if rx.wait_for(|stop| *stop).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Runs a TCP client connection to completion and logs how it ended.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    shutdown: watch::Receiver<bool>,
) {
    // Responses are flushed per batch already; don't let Nagle delay them
    let _ = stream.set_nodelay(true);

    let handler = ConnectionHandler::new(stream, addr, command_handler).with_shutdown(shutdown);
    match handler.run().await {
        Ok(()) => debug!(client = %addr, "Client disconnected"),
        Err(ConnectionError::Io(ref e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            debug!(client = %addr, "Connection reset by client")
        }
        Err(e @ ConnectionError::Parse(_)) => {
            info!(client = %addr, error = %e, "Connection closed")
        }
        Err(e) => debug!(client = %addr, error = %e, "Connection ended with error"),
    }
}
