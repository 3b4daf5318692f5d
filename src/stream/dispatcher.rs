//! Per-connection stream loop
//!
//! A dispatcher owns the receiving half of one sink. It registers the sink
//! under the requested topics, then pumps messages into a
//! [`StreamConnection`] while probing the peer on a timer. Whatever ends the
//! loop, the sink is removed from the broker and the connection is closed.
//!
//! The broker holds the only strong handles to the sink. The dispatcher keeps
//! a weak one, so [`Broker::disconnect`] closes the channel and ends the
//! stream once buffered messages are written.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::MissedTickBehavior;

use super::config::StreamConfig;
use super::connection::StreamConnection;
use crate::error::{Error, Result};
use crate::pubsub::{self, Broker, SinkReceiver, WeakSink};

/// Dispatch lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    /// Created, nothing registered
    Init,
    /// Registering the sink with the broker
    Subscribing,
    /// No topic accepted the sink
    Failed,
    /// Pushing frames to the peer
    Streaming,
    /// Tearing down
    Closing,
    /// Sink released, connection closed
    Closed,
}

/// Broker registrations of one sink, released on drop
struct Subscription<M> {
    broker: Arc<Broker<M>>,
    sink: WeakSink<M>,
}

impl<M> Subscription<M> {
    fn release(&self) {
        if let Some(sink) = self.sink.upgrade() {
            self.broker.unsubscribe_all(&sink);
        }
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Drives one streaming connection
pub struct Dispatcher<M> {
    id: u64,
    phase: DispatchPhase,
    broker: Arc<Broker<M>>,
    config: StreamConfig,
    topics: Vec<String>,
    subscription: Option<Subscription<M>>,
    receiver: Option<SinkReceiver<M>>,
}

impl<M> Dispatcher<M>
where
    M: Serialize + Send + 'static,
{
    pub fn new(id: u64, broker: Arc<Broker<M>>, config: StreamConfig) -> Self {
        Self {
            id,
            phase: DispatchPhase::Init,
            broker,
            config,
            topics: Vec::new(),
            subscription: None,
            receiver: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> DispatchPhase {
        self.phase
    }

    /// Topics the sink was accepted under
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Register a fresh sink under every topic that still has room.
    ///
    /// Topics at capacity are skipped. Fails with the capacity error when
    /// no topic accepted the sink, and with `BadRequest` for an empty list.
    pub fn subscribe(&mut self, topics: &[String]) -> Result<usize> {
        self.phase = DispatchPhase::Subscribing;

        if topics.is_empty() {
            self.phase = DispatchPhase::Failed;
            return Err(Error::BadRequest("no topic to stream".to_string()));
        }

        let (sink, receiver) = pubsub::channel(self.config.sink_capacity);
        let mut rejected = None;

        for topic in topics {
            match self.broker.subscribe(topic, &sink) {
                Ok(()) => self.topics.push(topic.clone()),
                Err(e) => {
                    tracing::warn!(
                        stream_id = self.id,
                        topic = %topic,
                        error = %e,
                        "Subscription rejected"
                    );
                    rejected = Some(e);
                }
            }
        }

        if self.topics.is_empty() {
            self.phase = DispatchPhase::Failed;
            return Err(match rejected {
                Some(e) => e.into(),
                None => Error::BadRequest("no topic to stream".to_string()),
            });
        }

        tracing::debug!(
            stream_id = self.id,
            topics = ?self.topics,
            "Subscribed"
        );

        self.subscription = Some(Subscription {
            broker: Arc::clone(&self.broker),
            sink: sink.downgrade(),
        });
        self.receiver = Some(receiver);
        Ok(self.topics.len())
    }

    /// Push messages to `connection` until the peer goes away or the broker
    /// drops the sink, then release the sink and close the connection.
    ///
    /// A sink dropped by the broker ends the stream with `Ok(())`; a failed
    /// write or probe is returned after cleanup.
    pub async fn stream<T>(&mut self, mut connection: StreamConnection<T>) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(mut receiver) = self.receiver.take() else {
            self.phase = DispatchPhase::Failed;
            return Err(Error::BadRequest("stream has no subscription".to_string()));
        };
        self.phase = DispatchPhase::Streaming;

        let result = self.pump(&mut receiver, &mut connection).await;

        self.phase = DispatchPhase::Closing;
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }
        drop(receiver);
        let closed = connection.close().await;
        self.phase = DispatchPhase::Closed;

        let stats = connection.stats();
        match &result {
            Ok(()) => tracing::info!(
                stream_id = self.id,
                frames = stats.frames_sent,
                bytes = stats.bytes_sent,
                "Stream ended: sink disconnected"
            ),
            Err(e) if e.is_disconnect() => tracing::info!(
                stream_id = self.id,
                frames = stats.frames_sent,
                bytes = stats.bytes_sent,
                duration_ms = stats.duration().as_millis() as u64,
                "Stream ended: peer gone"
            ),
            Err(e) => tracing::warn!(
                stream_id = self.id,
                frames = stats.frames_sent,
                error = %e,
                "Stream ended with error"
            ),
        }

        result.and(closed)
    }

    async fn pump<T>(
        &self,
        receiver: &mut SinkReceiver<M>,
        connection: &mut StreamConnection<T>,
    ) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut probe = tokio::time::interval(self.config.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        probe.tick().await;

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(message) => connection.write_frame(&message).await?,
                    None => return Ok(()),
                },
                _ = probe.tick() => {
                    connection.probe(self.config.probe_timeout).await?;
                }
            }
        }
    }
}
