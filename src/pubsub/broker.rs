//! Topic and pattern broker
//!
//! The central registry mapping topics and glob patterns to the sinks that
//! should receive what is published on them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::error::PubsubError;
use super::glob::Glob;
use super::sink::Sink;

/// Sinks registered under one glob pattern
struct PatternEntry<M> {
    /// Compiled pattern; `None` if malformed, which never matches
    glob: Option<Glob>,
    sinks: Vec<Sink<M>>,
}

/// Both registries, guarded together
struct Tables<M> {
    topics: HashMap<String, Vec<Sink<M>>>,
    patterns: HashMap<String, PatternEntry<M>>,
}

/// Publish/subscribe broker
///
/// Thread-safe via `RwLock`. Publishing only takes the read lock, so
/// publishers run concurrently and are serialized only against
/// subscribe/unsubscribe. The lock is never held across an await point.
///
/// Delivery is fire-and-forget: a sink that cannot take a message right now
/// misses it. Publishing never waits on a slow consumer.
pub struct Broker<M> {
    tables: RwLock<Tables<M>>,

    /// Maximum distinct sinks per topic or pattern (0 = unlimited)
    max_per_key: AtomicUsize,
}

impl<M> Broker<M> {
    /// Create a broker allowing at most `max_per_key` sinks per topic or
    /// pattern. Zero means unlimited.
    pub fn new(max_per_key: usize) -> Self {
        Self {
            tables: RwLock::new(Tables {
                topics: HashMap::new(),
                patterns: HashMap::new(),
            }),
            max_per_key: AtomicUsize::new(max_per_key),
        }
    }

    /// Create a broker without a per-key limit
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Configured per-key limit (0 = unlimited)
    pub fn max_per_key(&self) -> usize {
        self.max_per_key.load(Ordering::Relaxed)
    }

    /// Change the per-key limit, returning the previous one.
    ///
    /// Only later subscriptions are checked against it; keys already above
    /// a lowered limit keep their sinks.
    pub fn set_max_per_key(&self, max_per_key: usize) -> usize {
        self.max_per_key.swap(max_per_key, Ordering::Relaxed)
    }

    /// Subscribe `sink` to messages published on `topic`.
    ///
    /// Subscribing an already registered sink is a no-op. A sink whose
    /// receiver is gone is ignored.
    pub fn subscribe(&self, topic: &str, sink: &Sink<M>) -> Result<(), PubsubError> {
        if sink.is_closed() {
            return Ok(());
        }

        let mut tables = self.tables.write();
        let sinks = tables.topics.entry(topic.to_string()).or_default();
        let result = self.insert(sinks, topic, sink);
        if sinks.is_empty() {
            tables.topics.remove(topic);
        }

        if result.is_ok() {
            tracing::debug!(topic = topic, "Sink subscribed");
        }
        result
    }

    /// Subscribe `sink` to every topic matching the glob `pattern`.
    ///
    /// A malformed pattern is accepted and never matches.
    pub fn psubscribe(&self, pattern: &str, sink: &Sink<M>) -> Result<(), PubsubError> {
        if sink.is_closed() {
            return Ok(());
        }

        let mut tables = self.tables.write();
        let entry = tables
            .patterns
            .entry(pattern.to_string())
            .or_insert_with(|| PatternEntry {
                glob: Glob::new(pattern),
                sinks: Vec::new(),
            });
        if entry.glob.is_none() {
            tracing::warn!(pattern = pattern, "Malformed pattern will never match");
        }

        let result = self.insert(&mut entry.sinks, pattern, sink);
        if entry.sinks.is_empty() {
            tables.patterns.remove(pattern);
        }

        if result.is_ok() {
            tracing::debug!(pattern = pattern, "Sink subscribed to pattern");
        }
        result
    }

    /// Remove `sink` from `topic`. No-op if it was never there.
    pub fn unsubscribe(&self, topic: &str, sink: &Sink<M>) {
        let mut tables = self.tables.write();

        if let Some(sinks) = tables.topics.get_mut(topic) {
            if remove_sink(sinks, sink) {
                tracing::debug!(topic = topic, "Sink unsubscribed");
            }
            if sinks.is_empty() {
                tables.topics.remove(topic);
            }
        }
    }

    /// Remove `sink` from `pattern`. No-op if it was never there.
    pub fn punsubscribe(&self, pattern: &str, sink: &Sink<M>) {
        let mut tables = self.tables.write();

        if let Some(entry) = tables.patterns.get_mut(pattern) {
            if remove_sink(&mut entry.sinks, sink) {
                tracing::debug!(pattern = pattern, "Sink unsubscribed from pattern");
            }
            if entry.sinks.is_empty() {
                tables.patterns.remove(pattern);
            }
        }
    }

    /// Remove `sink` from every topic and every pattern
    pub fn unsubscribe_all(&self, sink: &Sink<M>) {
        let mut tables = self.tables.write();
        let mut removed = 0usize;

        tables.topics.retain(|_, sinks| {
            if remove_sink(sinks, sink) {
                removed += 1;
            }
            !sinks.is_empty()
        });
        tables.patterns.retain(|_, entry| {
            if remove_sink(&mut entry.sinks, sink) {
                removed += 1;
            }
            !entry.sinks.is_empty()
        });

        tracing::debug!(registrations = removed, "Sink unsubscribed from all");
    }

    /// Drop every sink registered under `topic`.
    ///
    /// Streams whose sink has no other registration see their channel close
    /// once queued messages are drained. Returns the number of sinks removed.
    pub fn disconnect(&self, topic: &str) -> usize {
        let removed = self
            .tables
            .write()
            .topics
            .remove(topic)
            .map(|sinks| sinks.len())
            .unwrap_or(0);

        if removed > 0 {
            tracing::info!(topic = topic, sinks = removed, "Topic disconnected");
        }
        removed
    }

    /// Number of topics with at least one sink
    pub fn topic_count(&self) -> usize {
        self.tables.read().topics.len()
    }

    /// Number of patterns with at least one sink
    pub fn pattern_count(&self) -> usize {
        self.tables.read().patterns.len()
    }

    /// Number of sinks subscribed to exactly `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.tables.read().topics.get(topic).map_or(0, Vec::len)
    }

    /// Number of sinks subscribed to `pattern`
    pub fn pattern_subscriber_count(&self, pattern: &str) -> usize {
        self.tables
            .read()
            .patterns
            .get(pattern)
            .map_or(0, |entry| entry.sinks.len())
    }

    /// Whether `sink` is registered anywhere
    pub fn is_subscribed(&self, sink: &Sink<M>) -> bool {
        let tables = self.tables.read();
        tables.topics.values().flatten().any(|s| s.same(sink))
            || tables
                .patterns
                .values()
                .flat_map(|entry| entry.sinks.iter())
                .any(|s| s.same(sink))
    }

    fn insert(&self, sinks: &mut Vec<Sink<M>>, key: &str, sink: &Sink<M>) -> Result<(), PubsubError> {
        if sinks.iter().any(|s| s.same(sink)) {
            return Ok(());
        }
        let limit = self.max_per_key();
        if limit > 0 && sinks.len() >= limit {
            tracing::warn!(
                key = key,
                limit = limit,
                "Subscription rejected: limit reached"
            );
            return Err(PubsubError::CapacityExceeded(key.to_string()));
        }
        sinks.push(sink.clone());
        Ok(())
    }
}

impl<M: Clone> Broker<M> {
    /// Publish `message` on `topic`.
    ///
    /// Every sink subscribed to `topic`, and every sink of every pattern
    /// matching `topic`, gets one non-blocking delivery attempt. Returns the
    /// number of sinks that accepted the message.
    pub fn publish(&self, topic: &str, message: M) -> usize {
        let tables = self.tables.read();
        let mut delivered = 0;
        let mut attempted = 0;

        let exact = tables.topics.get(topic).into_iter().flatten();
        let matched = tables
            .patterns
            .values()
            .filter(|entry| entry.glob.as_ref().is_some_and(|g| g.matches(topic)))
            .flat_map(|entry| entry.sinks.iter());

        for sink in exact.chain(matched) {
            attempted += 1;
            if sink.try_deliver(message.clone()) {
                delivered += 1;
            }
        }

        if delivered < attempted {
            tracing::trace!(
                topic = topic,
                delivered = delivered,
                dropped = attempted - delivered,
                "Published with drops"
            );
        }
        delivered
    }
}

impl<M> Default for Broker<M> {
    fn default() -> Self {
        Self::unbounded()
    }
}

fn remove_sink<M>(sinks: &mut Vec<Sink<M>>, sink: &Sink<M>) -> bool {
    match sinks.iter().position(|s| s.same(sink)) {
        Some(i) => {
            sinks.remove(i);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::sink::channel;
    use super::*;

    #[test]
    fn test_publish_does_not_block_on_full_sink() {
        let broker = Broker::unbounded();
        let (sink, _rx) = channel::<&str>(1);
        broker.subscribe("nonblock", &sink).unwrap();

        // Second publish finds the sink full and must return immediately
        assert_eq!(broker.publish("nonblock", "first"), 1);
        assert_eq!(broker.publish("nonblock", "second"), 0);
    }

    #[test]
    fn test_publish_delivers_only_to_ready_sinks() {
        let broker = Broker::unbounded();
        let (ready, mut ready_rx) = channel::<u32>(1);
        let (busy, mut busy_rx) = channel::<u32>(1);
        broker.subscribe("t", &ready).unwrap();
        broker.subscribe("t", &busy).unwrap();
        assert!(busy.try_deliver(0));

        assert_eq!(broker.publish("t", 7), 1);
        assert_eq!(ready_rx.try_recv().unwrap(), 7);
        assert_eq!(busy_rx.try_recv().unwrap(), 0);
        assert!(busy_rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_removes_empty_entries() {
        let broker = Broker::unbounded();
        let (c1, _r1) = channel::<u32>(1);
        let (c2, _r2) = channel::<u32>(1);

        assert_eq!(broker.topic_count(), 0);

        broker.subscribe("sub", &c1).unwrap();
        broker.subscribe("sub", &c2).unwrap();
        broker.subscribe("sub", &c2).unwrap();
        assert_eq!(broker.topic_count(), 1);
        assert_eq!(broker.subscriber_count("sub"), 2);

        broker.unsubscribe("sub", &c1);
        assert_eq!(broker.subscriber_count("sub"), 1);
        broker.subscribe("sub1", &c1).unwrap();
        assert_eq!(broker.subscriber_count("sub"), 1);
        assert_eq!(broker.subscriber_count("sub1"), 1);

        broker.unsubscribe("sub", &c2);
        broker.unsubscribe("sub1", &c1);
        assert_eq!(broker.topic_count(), 0);
    }

    #[test]
    fn test_punsubscribe_removes_empty_entries() {
        let broker = Broker::unbounded();
        let (c1, _r1) = channel::<u32>(1);
        let (c2, _r2) = channel::<u32>(1);

        broker.psubscribe("sub*", &c1).unwrap();
        broker.psubscribe("sub*", &c2).unwrap();
        broker.psubscribe("sub*", &c2).unwrap();
        assert_eq!(broker.pattern_count(), 1);
        assert_eq!(broker.pattern_subscriber_count("sub*"), 2);

        broker.punsubscribe("sub*", &c1);
        broker.punsubscribe("sub*", &c1);
        assert_eq!(broker.pattern_subscriber_count("sub*"), 1);

        broker.punsubscribe("sub*", &c2);
        assert_eq!(broker.pattern_count(), 0);
    }

    #[test]
    fn test_closed_sink_is_ignored() {
        let broker = Broker::unbounded();
        let (sink, rx) = channel::<u32>(1);
        drop(rx);

        assert!(broker.subscribe("sub", &sink).is_ok());
        assert!(broker.psubscribe("sub*", &sink).is_ok());
        assert_eq!(broker.topic_count(), 0);
        assert_eq!(broker.pattern_count(), 0);
    }

    #[test]
    fn test_unsubscribe_absent_is_noop() {
        let broker = Broker::new(2);
        let (c, _rc) = channel::<u32>(1);
        let (d, _rd) = channel::<u32>(1);
        broker.subscribe("name", &c).unwrap();
        broker.psubscribe("name", &c).unwrap();

        broker.unsubscribe("n", &c);
        broker.punsubscribe("n", &c);
        broker.unsubscribe("name", &d);
        broker.punsubscribe("name", &d);
        broker.unsubscribe_all(&d);

        assert_eq!(broker.subscriber_count("name"), 1);
        assert_eq!(broker.pattern_subscriber_count("name"), 1);
    }

    #[test]
    fn test_capacity_limit() {
        for limit in [1usize, 2, 3] {
            let broker = Broker::new(limit);
            let mut keep = Vec::new();

            for _ in 0..limit {
                let (sink, rx) = channel::<u32>(1);
                assert!(broker.subscribe("name", &sink).is_ok());
                // Re-subscribing never fails and never counts
                assert!(broker.subscribe("name", &sink).is_ok());
                assert!(broker.psubscribe("name", &sink).is_ok());
                keep.push((sink, rx));
            }
            assert_eq!(broker.subscriber_count("name"), limit);

            let (extra, _rx) = channel::<u32>(1);
            assert_eq!(
                broker.subscribe("name", &extra),
                Err(PubsubError::CapacityExceeded("name".into()))
            );
            assert_eq!(
                broker.psubscribe("name", &extra),
                Err(PubsubError::CapacityExceeded("name".into()))
            );
            assert!(broker.subscribe("other", &extra).is_ok());

            // Existing sinks can still re-subscribe at the limit
            assert!(broker.subscribe("name", &keep[0].0).is_ok());
            assert_eq!(broker.subscriber_count("name"), limit);
        }
    }

    #[test]
    fn test_rejected_subscribe_leaves_no_entry() {
        // A zero-length entry must not be created by a rejected first subscribe
        let broker = Broker::new(1);
        let (a, _ra) = channel::<u32>(1);
        let (b, _rb) = channel::<u32>(1);
        broker.subscribe("x", &a).unwrap();
        broker.unsubscribe("x", &a);
        assert_eq!(broker.topic_count(), 0);

        broker.subscribe("x", &a).unwrap();
        assert!(broker.subscribe("x", &b).is_err());
        assert_eq!(broker.topic_count(), 1);
    }

    #[test]
    fn test_limit_change_applies_to_new_subscriptions() {
        let broker = Broker::unbounded();
        let (a, _ra) = channel::<u32>(1);
        let (b, _rb) = channel::<u32>(1);
        let (c, _rc) = channel::<u32>(1);
        broker.subscribe("x", &a).unwrap();
        broker.subscribe("x", &b).unwrap();

        assert_eq!(broker.set_max_per_key(1), 0);
        assert_eq!(broker.max_per_key(), 1);
        assert_eq!(broker.subscriber_count("x"), 2);
        assert!(broker.subscribe("x", &c).is_err());
        assert!(broker.subscribe("y", &c).is_ok());

        broker.set_max_per_key(0);
        assert!(broker.subscribe("x", &c).is_ok());
        assert_eq!(broker.subscriber_count("x"), 3);
    }

    #[test]
    fn test_unlimited() {
        let broker = Broker::new(0);
        let mut keep = Vec::new();
        for _ in 0..100 {
            let (sink, rx) = channel::<u32>(1);
            broker.subscribe("name", &sink).unwrap();
            keep.push((sink, rx));
        }
        assert_eq!(broker.subscriber_count("name"), 100);
    }

    #[test]
    fn test_unsubscribe_all() {
        let broker = Broker::new(2);
        let (c, _rc) = channel::<u32>(1);
        let (d, _rd) = channel::<u32>(1);
        broker.subscribe("name", &c).unwrap();
        broker.psubscribe("name", &c).unwrap();
        broker.subscribe("name", &d).unwrap();
        broker.psubscribe("name", &d).unwrap();
        broker.subscribe("other", &c).unwrap();

        broker.unsubscribe_all(&c);
        assert!(!broker.is_subscribed(&c));
        assert_eq!(broker.topic_count(), 1);
        assert_eq!(broker.pattern_count(), 1);
        assert_eq!(broker.subscriber_count("name"), 1);

        broker.unsubscribe_all(&d);
        assert_eq!(broker.topic_count(), 0);
        assert_eq!(broker.pattern_count(), 0);
    }

    #[test]
    fn test_pattern_delivery() {
        let broker = Broker::unbounded();
        let (abc, mut abc_rx) = channel::<&str>(1);
        let (ab_any, mut ab_any_rx) = channel::<&str>(2);
        let (cd_one, mut cd_one_rx) = channel::<&str>(2);
        let (cd_class, mut cd_class_rx) = channel::<&str>(2);

        broker.subscribe("abc", &abc).unwrap();
        broker.psubscribe("ab*", &ab_any).unwrap();
        broker.psubscribe("cd?", &cd_one).unwrap();
        broker.psubscribe("cd[e]", &cd_class).unwrap();

        assert_eq!(broker.publish("abc", "abc"), 2);
        assert_eq!(broker.publish("abd", "abd"), 1);
        assert_eq!(broker.publish("cde", "cde"), 2);
        assert_eq!(broker.publish("xyz", "xyz"), 0);

        assert_eq!(abc_rx.try_recv().unwrap(), "abc");
        assert_eq!(ab_any_rx.try_recv().unwrap(), "abc");
        assert_eq!(ab_any_rx.try_recv().unwrap(), "abd");
        assert!(ab_any_rx.try_recv().is_err());
        assert_eq!(cd_one_rx.try_recv().unwrap(), "cde");
        assert_eq!(cd_class_rx.try_recv().unwrap(), "cde");
    }

    #[test]
    fn test_malformed_pattern_never_matches() {
        let broker = Broker::unbounded();
        let (sink, mut rx) = channel::<u32>(1);
        broker.psubscribe("[abc", &sink).unwrap();

        assert_eq!(broker.pattern_count(), 1);
        assert_eq!(broker.publish("a", 1), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disconnect_closes_sole_registration() {
        let broker = Broker::unbounded();
        let (sink, mut rx) = channel::<u32>(2);
        let weak = sink.downgrade();
        broker.subscribe("room", &sink).unwrap();
        drop(sink);

        broker.publish("room", 1);
        assert_eq!(broker.disconnect("room"), 1);
        assert_eq!(broker.topic_count(), 0);
        assert!(weak.upgrade().is_none());

        // Queued message drains, then the channel reports closed
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(broker.disconnect("room"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_publishers_never_block() {
        let broker = Arc::new(Broker::unbounded());
        let mut receivers = Vec::new();
        for _ in 0..32 {
            // Slow subscribers: nobody ever reads these
            let (sink, rx) = channel::<u64>(1);
            broker.subscribe("load", &sink).unwrap();
            receivers.push(rx);
        }

        let mut handles = Vec::new();
        for i in 0..8u64 {
            let broker = Arc::clone(&broker);
            handles.push(tokio::spawn(async move {
                for j in 0..1000u64 {
                    broker.publish("load", i * 1000 + j);
                }
            }));
        }

        let all = async {
            for handle in handles {
                handle.await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .expect("publishers blocked");

        for mut rx in receivers {
            assert!(rx.try_recv().is_ok());
            assert!(rx.try_recv().is_err());
        }
    }
}
