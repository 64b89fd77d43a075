//! TCP server: binds the listener, accepts clients and spawns one
//! [`handle_connection`] task per socket.
//!
//! Shutdown stops the accept loop first, then flips a `watch` flag that every
//! connection checks between requests, then waits (bounded) for the
//! connection tasks to finish.

use crate::commands::CommandHandler;
use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::storage::StorageEngine;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// How long shutdown waits for open connections to finish.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed `accept` so a persistent error doesn't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound server, ready to accept connections.
pub struct Server {
    listener: TcpListener,
    handler: CommandHandler,
    drain_timeout: Duration,
}

impl Server {
    /// Binds the listener. Nothing is accepted until [`Server::run_until`].
    pub async fn bind(
        addr: &str,
        storage: Arc<StorageEngine>,
        config: Arc<ServerConfig>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            handler: CommandHandler::new(storage, config),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves, then drains them.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connections = JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!(client = %addr, "Accepted connection");
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            self.handler.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        if backoff_unless_shutdown(ACCEPT_ERROR_BACKOFF, &mut shutdown).await {
                            break;
                        }
                    }
                },
                _ = &mut shutdown => break,
            }

            // Reap finished connections so the set doesn't grow unbounded
            while connections.try_join_next().is_some() {}
        }

        drop(self.listener);

        let open = connections.len();
        if open > 0 {
            info!(connections = open, "Waiting for open connections to close");
        }
        let _ = shutdown_tx.send(true);

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "Drain timeout reached, aborting remaining connections"
            );
            connections.shutdown().await;
        }
    }
}

/// Sleeps for `backoff` unless `shutdown` resolves first. Returns `true` if it
/// did.
async fn backoff_unless_shutdown<F>(backoff: Duration, shutdown: &mut F) -> bool
where
    F: Future<Output = ()> + Unpin,
{
    tokio::select! {
        _ = tokio::time::sleep(backoff) => false,
        _ = shutdown => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start() -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let storage = Arc::new(StorageEngine::new());
        storage.set(Bytes::from("preloaded"), Bytes::from("yes"));

        let server = Server::bind("127.0.0.1:0", storage, Arc::new(ServerConfig::default()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.run_until(async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        }));

        (addr, stop_tx, task)
    }

    #[tokio::test]
    async fn test_serves_shared_store() {
        let (addr, _stop, _task) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$9\r\npreloaded\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$3\r\nyes\r\n");
    }

    #[tokio::test]
    async fn test_backoff_yields_to_shutdown() {
        let mut stop = std::future::ready(());
        let interrupted = tokio::time::timeout(
            Duration::from_secs(1),
            backoff_unless_shutdown(Duration::from_secs(30), &mut stop),
        )
        .await
        .expect("backoff ignored shutdown");
        assert!(interrupted);

        let mut never = std::future::pending::<()>();
        assert!(!backoff_unless_shutdown(Duration::from_millis(10), &mut never).await);
    }

    #[tokio::test]
    async fn test_bind_error() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();

        let result = Server::bind(
            &addr,
            Arc::new(StorageEngine::new()),
            Arc::new(ServerConfig::default()),
        )
        .await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_closes_listener_and_connections() {
        let (addr, stop, task) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");

        stop.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("server did not stop")
            .unwrap();

        // the idle connection was closed by the server
        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
