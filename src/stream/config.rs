//! Stream configuration

use std::time::Duration;

/// Per-stream tuning shared by every streaming endpoint of a server
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Maximum distinct sinks per topic (0 = unlimited)
    pub max_subscribers_per_topic: usize,

    /// How often an idle stream checks that its peer is still there
    pub probe_interval: Duration,

    /// Read deadline for a single liveness probe
    pub probe_timeout: Duration,

    /// Deadline for writing and flushing one frame
    pub write_timeout: Duration,

    /// Bytes appended after every frame
    pub frame_delimiter: String,

    /// Messages buffered per stream before publishes start dropping
    pub sink_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_subscribers_per_topic: 0, // Unlimited
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(10),
            write_timeout: Duration::from_secs(1),
            frame_delimiter: "\n".to_string(),
            sink_capacity: 16,
        }
    }
}

impl StreamConfig {
    /// Set the per-topic subscriber limit
    pub fn max_subscribers_per_topic(mut self, max: usize) -> Self {
        self.max_subscribers_per_topic = max;
        self
    }

    /// Set the probe interval
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the probe read timeout
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the frame write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the frame delimiter
    pub fn frame_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.frame_delimiter = delimiter.into();
        self
    }

    /// Set the sink buffer size (at least 1)
    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity.max(1);
        self
    }
}
