//! Ingest server listener
//!
//! Owns both accept loops and spawns a handler task per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::StreamRegistry;
use crate::server::config::ServerConfig;
use crate::server::ftl::HandshakeConnection;
use crate::server::rtmp::MessageConnection;

/// Which dialect a listener speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Handshake,
    Message,
}

impl Dialect {
    fn as_str(self) -> &'static str {
        match self {
            Dialect::Handshake => "ftl",
            Dialect::Message => "rtmp",
        }
    }
}

/// Ingest server accepting both dialects
pub struct IngestServer {
    config: ServerConfig,
    registry: Arc<StreamRegistry>,
    handshake_listener: TcpListener,
    message_listener: TcpListener,
    next_session_id: AtomicU64,
    handshake_semaphore: Option<Arc<Semaphore>>,
    message_semaphore: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl IngestServer {
    /// Bind both listeners
    pub async fn bind(config: ServerConfig, registry: Arc<StreamRegistry>) -> Result<Self> {
        let handshake_listener = TcpListener::bind(config.handshake_addr).await?;
        let message_listener = TcpListener::bind(config.message_addr).await?;

        let semaphore = || {
            (config.max_connections > 0).then(|| Arc::new(Semaphore::new(config.max_connections)))
        };

        Ok(Self {
            handshake_semaphore: semaphore(),
            message_semaphore: semaphore(),
            config,
            registry,
            handshake_listener,
            message_listener,
            next_session_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    /// Get a reference to the stream registry
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Bound address of the handshake-dialect listener
    pub fn handshake_addr(&self) -> std::io::Result<SocketAddr> {
        self.handshake_listener.local_addr()
    }

    /// Bound address of the message-dialect listener
    pub fn message_addr(&self) -> std::io::Result<SocketAddr> {
        self.message_listener.local_addr()
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` resolves the listeners stop accepting, open
    /// connections are signalled, and every registered stream is stopped.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tracing::info!(
            handshake_addr = ?self.handshake_addr().ok(),
            message_addr = ?self.message_addr().ok(),
            "Ingest server listening"
        );

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            _ = self.accept_loop(Dialect::Handshake) => {}
            _ = self.accept_loop(Dialect::Message) => {}
        }

        self.shutdown.cancel();
        self.registry.shutdown().await;
        Ok(())
    }

    async fn accept_loop(&self, dialect: Dialect) {
        let listener = match dialect {
            Dialect::Handshake => &self.handshake_listener,
            Dialect::Message => &self.message_listener,
        };

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(dialect, socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(dialect = dialect.as_str(), error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, dialect: Dialect, socket: TcpStream, peer_addr: SocketAddr) {
        let semaphore = match dialect {
            Dialect::Handshake => &self.handshake_semaphore,
            Dialect::Message => &self.message_semaphore,
        };

        // Check connection limit
        let permit = if let Some(sem) = semaphore {
            match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, dialect = dialect.as_str(), "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            dialect = dialect.as_str(),
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let _permit = permit;

            let result = match dialect {
                Dialect::Handshake => {
                    HandshakeConnection::new(session_id, socket, peer_addr, config, registry, cancel)
                        .run()
                        .await
                }
                Dialect::Message => {
                    MessageConnection::new(session_id, socket, peer_addr, config, registry, cancel)
                        .run()
                        .await
                }
            };

            if let Err(e) = result {
                tracing::warn!(
                    session_id = session_id,
                    dialect = dialect.as_str(),
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }
}

impl std::fmt::Debug for IngestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestServer")
            .field("handshake_addr", &self.handshake_addr().ok())
            .field("message_addr", &self.message_addr().ok())
            .finish()
    }
}
