//! Content-Encoding hooks
//!
//! A compressor hands out one stateful [`Encoder`] per stream. Every frame is
//! pushed through the encoder and whatever it emits is flushed with the frame,
//! so compressed streams stay frame-aligned on the wire.
//!
//! `gzip` and raw `deflate` are registered by default.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use bytes::BytesMut;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;

/// Per-stream encoder state
pub trait Encoder: Send {
    /// Encode `input`, appending output bytes to `out`
    fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> io::Result<()>;

    /// Emit any trailer once the stream ends
    fn finish(&mut self, out: &mut BytesMut) -> io::Result<()>;
}

/// Factory for encoders of one `Content-Encoding`
pub trait Compressor: Send + Sync {
    /// Token used in `Accept-Encoding` / `Content-Encoding`, e.g. `gzip`
    fn name(&self) -> &str;

    /// Fresh encoder for one stream
    fn encoder(&self) -> io::Result<Box<dyn Encoder>>;
}

/// `Content-Encoding: gzip`
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
}

impl GzipCompressor {
    pub fn new(level: Compression) -> Self {
        Self { level }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &str {
        "gzip"
    }

    fn encoder(&self) -> io::Result<Box<dyn Encoder>> {
        Ok(Box::new(FlateEncoder::Gzip(GzEncoder::new(Vec::new(), self.level))))
    }
}

/// `Content-Encoding: deflate`, as a raw deflate stream
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompressor {
    level: Compression,
}

impl DeflateCompressor {
    pub fn new(level: Compression) -> Self {
        Self { level }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl Compressor for DeflateCompressor {
    fn name(&self) -> &str {
        "deflate"
    }

    fn encoder(&self) -> io::Result<Box<dyn Encoder>> {
        Ok(Box::new(FlateEncoder::Deflate(DeflateEncoder::new(
            Vec::new(),
            self.level,
        ))))
    }
}

/// flate2 writer over an in-memory buffer that is drained after every call.
///
/// `flush` is a zlib sync flush: everything written so far becomes
/// decodable without ending the stream.
enum FlateEncoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(DeflateEncoder<Vec<u8>>),
}

impl FlateEncoder {
    fn drain(pending: &mut Vec<u8>, out: &mut BytesMut) {
        out.extend_from_slice(pending);
        pending.clear();
    }
}

impl Encoder for FlateEncoder {
    fn encode(&mut self, input: &[u8], out: &mut BytesMut) -> io::Result<()> {
        match self {
            FlateEncoder::Gzip(writer) => {
                writer.write_all(input)?;
                writer.flush()?;
                Self::drain(writer.get_mut(), out);
            }
            FlateEncoder::Deflate(writer) => {
                writer.write_all(input)?;
                writer.flush()?;
                Self::drain(writer.get_mut(), out);
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut BytesMut) -> io::Result<()> {
        match self {
            FlateEncoder::Gzip(writer) => {
                writer.try_finish()?;
                Self::drain(writer.get_mut(), out);
            }
            FlateEncoder::Deflate(writer) => {
                writer.try_finish()?;
                Self::drain(writer.get_mut(), out);
            }
        }
        Ok(())
    }
}

/// Compressors keyed by encoding name
#[derive(Clone)]
pub struct Compressors {
    by_name: HashMap<String, Arc<dyn Compressor>>,
}

impl Compressors {
    /// Registry with `gzip` and `deflate`
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(GzipCompressor::default()));
        registry.register(Arc::new(DeflateCompressor::default()));
        registry
    }

    /// Registry with nothing registered; streams go out uncompressed
    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    /// Add or replace the compressor for its encoding name
    pub fn register(&mut self, compressor: Arc<dyn Compressor>) {
        self.by_name
            .insert(compressor.name().to_ascii_lowercase(), compressor);
    }

    /// Look up a compressor by encoding name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        self.by_name.get(&name.trim().to_ascii_lowercase()).cloned()
    }

    /// Pick the first registered encoding listed in `Accept-Encoding`
    pub fn negotiate(&self, accept_encoding: Option<&str>) -> Option<Arc<dyn Compressor>> {
        accept_encoding?
            .split(',')
            .filter_map(|token| token.split(';').next())
            .find_map(|name| self.get(name))
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for Compressors {
    fn default() -> Self {
        Self::new()
    }
}
