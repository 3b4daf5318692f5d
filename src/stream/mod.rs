//! Server-pushed streams over hijacked connections
//!
//! ```text
//!   Broker ──try_send──► SinkReceiver ──► Dispatcher ──► StreamConnection ──► socket
//!                                             │                 ▲
//!                                             └── probe timer ──┘
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod probe;
pub mod stats;

pub use config::StreamConfig;
pub use connection::StreamConnection;
pub use dispatcher::{DispatchPhase, Dispatcher};
pub use probe::probe;
pub use stats::StreamStats;
