//! HTTP front end
//!
//! Accepts TCP connections, reads one request per connection and routes it
//! either to a plain handler or to a stream dispatcher.

pub mod config;
mod connection;
pub mod exchange;
pub mod listener;
pub mod router;

pub use config::ServerConfig;
pub use exchange::Exchange;
pub use listener::Server;
pub use router::{Endpoint, HandlerFn, Params, RouteMatch, Router, TopicResolver};
