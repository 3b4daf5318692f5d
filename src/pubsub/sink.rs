//! Sink handles
//!
//! A sink is the sending half of a bounded channel owned by one consumer.
//! Two sinks are the same sink when they feed the same channel, so clones of
//! one handle count once no matter how often they are registered.

use tokio::sync::mpsc;

/// Receiving half of a sink
pub type SinkReceiver<M> = mpsc::Receiver<M>;

/// Create a sink with room for `capacity` undelivered messages (at least one)
pub fn channel<M>(capacity: usize) -> (Sink<M>, SinkReceiver<M>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Sink { tx }, rx)
}

/// Producer handle registered with the broker
pub struct Sink<M> {
    tx: mpsc::Sender<M>,
}

impl<M> Sink<M> {
    /// Reference identity: true when both handles feed the same channel
    pub fn same(&self, other: &Sink<M>) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Whether the receiving half has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Free slots left in the channel
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Hand a message over without waiting.
    ///
    /// Returns false when the channel is full or closed; the message is dropped.
    pub fn try_deliver(&self, message: M) -> bool {
        self.tx.try_send(message).is_ok()
    }

    /// Handle that does not keep the channel open
    pub fn downgrade(&self) -> WeakSink<M> {
        WeakSink {
            tx: self.tx.downgrade(),
        }
    }
}

impl<M> Clone for Sink<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> std::fmt::Debug for Sink<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Non-owning sink handle
///
/// The dispatcher keeps one of these so that dropping every broker
/// registration closes the channel and ends the stream.
pub struct WeakSink<M> {
    tx: mpsc::WeakSender<M>,
}

impl<M> WeakSink<M> {
    /// Recover a sink if any strong handle is still alive
    pub fn upgrade(&self) -> Option<Sink<M>> {
        self.tx.upgrade().map(|tx| Sink { tx })
    }
}

impl<M> Clone for WeakSink<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}
