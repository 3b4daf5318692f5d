//! Publish/subscribe broker
//!
//! Senders publish on a topic without knowing who listens. Each listener owns
//! a bounded channel (a [`Sink`]) registered under exact topics or glob
//! patterns.
//!
//! ```text
//!                        Arc<Broker<M>>
//!               ┌──────────────────────────────┐
//!               │ topics:   "123"  -> [s1, s2] │
//!               │ patterns: "ab*"  -> [s3]     │
//!               └──────────────┬───────────────┘
//!                              │ publish("abc", m): try_send
//!             ┌────────────────┼────────────────┐
//!             ▼                ▼                ▼
//!           [s1]             [s2]             [s3]
//! ```
//!
//! # Backpressure
//!
//! Delivery never blocks. A sink whose channel is full misses the message;
//! nothing is queued on the publisher's side.

pub mod broker;
pub mod error;
pub mod glob;
pub mod sink;

pub use broker::Broker;
pub use error::PubsubError;
pub use glob::Glob;
pub use sink::{channel, Sink, SinkReceiver, WeakSink};
