//! HTTP server listener
//!
//! Handles the TCP accept loop and spawns one task per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::codec::{Compressors, Marshallers};
use crate::error::Result;
use crate::pubsub::Broker;
use crate::server::config::ServerConfig;
use crate::server::connection::{Connection, Shared};
use crate::server::router::Router;

/// Push-streaming HTTP server
pub struct Server {
    shared: Shared,
    next_connection_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Server {
    /// Create a server around an existing broker.
    ///
    /// `config.stream.max_subscribers_per_topic` is the limit in force: a
    /// broker created with a different one is switched over to it.
    pub fn new(config: ServerConfig, router: Router, broker: Arc<Broker<Value>>) -> Self {
        let limit = config.stream.max_subscribers_per_topic;
        let previous = broker.set_max_per_key(limit);
        if previous != limit {
            tracing::warn!(
                broker_limit = previous,
                configured_limit = limit,
                "Broker subscriber limit overridden by server config"
            );
        }

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            shared: Shared {
                config,
                router: Arc::new(router),
                broker,
                marshallers: Arc::new(Marshallers::new()),
                compressors: Arc::new(Compressors::new()),
            },
            next_connection_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Create a server with a broker sized from `config.stream`
    pub fn from_config(config: ServerConfig, router: Router) -> Self {
        let broker = Arc::new(Broker::new(config.stream.max_subscribers_per_topic));
        Self::new(config, router, broker)
    }

    /// Replace the marshaller registry used for `Accept` negotiation
    pub fn with_marshallers(mut self, marshallers: Marshallers) -> Self {
        self.shared.marshallers = Arc::new(marshallers);
        self
    }

    /// Replace the compressor registry used for `Accept-Encoding` negotiation
    pub fn with_compressors(mut self, compressors: Compressors) -> Self {
        self.shared.compressors = Arc::new(compressors);
        self
    }

    /// Get a reference to the broker
    pub fn broker(&self) -> &Arc<Broker<Value>> {
        &self.shared.broker
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.shared.config.bind_addr).await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, routes = self.shared.router.len(), "HTTP server listening");

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            connection_id = connection_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.shared.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let shared = self.shared.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let connection = Connection::new(connection_id, socket, Some(peer_addr), shared);

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    connection_id = connection_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(connection_id = connection_id, "Connection closed");
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.shared.config.bind_addr
    }
}
