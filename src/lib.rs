//! restream: server-pushed HTTP streams fed by a publish/subscribe broker
//!
//! A stream endpoint turns one accepted HTTP/1.1 request into a long-lived
//! connection. The server takes over the raw socket, writes the status line
//! and headers itself, then pushes one delimited frame per published message
//! until the peer goes away.
//!
//! ```text
//!   POST /publish/123 ──► Broker::publish("123", msg)
//!                               │ try_send (drop when full)
//!               ┌───────────────┼───────────────┐
//!               ▼               ▼               ▼
//!            [Sink]          [Sink]          [Sink]
//!               │               │               │
//!          dispatcher      dispatcher      dispatcher   (one task per connection)
//!               │               │               │
//!          StreamConnection ──► "HTTP/1.1 200 OK\r\n...\r\n" msg\n msg\n ...
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use restream::pubsub::Broker;
//! use restream::server::{Endpoint, Router, Server, ServerConfig};
//! use restream::http::{Response, StatusCode};
//!
//! # async fn example() -> restream::error::Result<()> {
//! let broker = Arc::new(Broker::new(16));
//!
//! let publisher = Arc::clone(&broker);
//! let router = Router::new()
//!     .route("GET", "/watch/:topic", Endpoint::stream(|_req, params| {
//!         Ok(vec![params.get("topic").unwrap_or_default().to_string()])
//!     }))
//!     .route("POST", "/publish/:topic", Endpoint::handler(move |req, params| {
//!         let topic = params.get("topic").unwrap_or_default();
//!         let text = String::from_utf8_lossy(&req.body).into_owned();
//!         publisher.publish(topic, text.into());
//!         Response::new(StatusCode::NO_CONTENT)
//!     }));
//!
//! let server = Server::new(ServerConfig::default(), router, broker);
//! server.run().await
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod http;
pub mod pubsub;
pub mod server;
pub mod stream;

pub use error::{Error, Result};
pub use pubsub::{Broker, PubsubError, Sink};
pub use server::{Server, ServerConfig};
pub use stream::{StreamConfig, StreamConnection};
