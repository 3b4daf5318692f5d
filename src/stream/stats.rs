//! Statistics for streaming connections

use std::time::{Duration, Instant};

/// Counters for one stream
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Start time
    pub started_at: Instant,
    /// Frames written
    pub frames_sent: u64,
    /// Bytes written, preamble included
    pub bytes_sent: u64,
    /// Probes that found the peer alive
    pub probes: u64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames_sent: 0,
            bytes_sent: 0,
            probes: 0,
        }
    }

    /// Get duration since the stream started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Average frame rate over the stream lifetime
    pub fn frame_rate(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.frames_sent as f64 / secs
        } else {
            0.0
        }
    }

    pub(crate) fn record_frame(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_bytes(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}
