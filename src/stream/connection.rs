//! Frame writer over a hijacked transport
//!
//! Once a connection is taken over, nothing else writes HTTP framing for it.
//! The status line and header block go out lazily with the first payload
//! byte (or on close), exactly once. After that every frame is
//! `<marshaled value><delimiter>`, optionally run through a compression
//! encoder, and flushed immediately.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::config::StreamConfig;
use super::probe;
use super::stats::StreamStats;
use crate::codec::{Compressor, Encoder, MarshalError, Marshaller};
use crate::error::{Error, Result};
use crate::http::{write_preamble, Headers, StatusCode};

/// A streaming HTTP response written by hand onto a raw transport
pub struct StreamConnection<T> {
    transport: T,
    buf: BytesMut,
    marshaller: Arc<dyn Marshaller>,
    encoder: Option<Box<dyn Encoder>>,
    delimiter: String,
    status: StatusCode,
    headers: Headers,
    header_written: bool,
    closed: bool,
    write_timeout: Duration,
    stats: StreamStats,
}

impl<T> StreamConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a hijacked transport
    pub fn new(transport: T, marshaller: Arc<dyn Marshaller>, config: &StreamConfig) -> Self {
        let mut headers = Headers::new();
        headers.set("Connection", "keep-alive");
        headers.set(
            "Content-Type",
            format!("{}; charset=utf-8", marshaller.mime()),
        );

        Self {
            transport,
            buf: BytesMut::with_capacity(4096),
            marshaller,
            encoder: None,
            delimiter: config.frame_delimiter.clone(),
            status: StatusCode::OK,
            headers,
            header_written: false,
            closed: false,
            write_timeout: config.write_timeout,
            stats: StreamStats::new(),
        }
    }

    /// Compress everything after the preamble
    pub fn with_compressor(mut self, compressor: &dyn Compressor) -> std::io::Result<Self> {
        self.encoder = Some(compressor.encoder()?);
        self.headers.set("Content-Encoding", compressor.name());
        Ok(self)
    }

    /// Change the status; ignored once the preamble is out
    pub fn set_status(&mut self, status: StatusCode) {
        if !self.header_written {
            self.status = status;
        }
    }

    /// Set a response header; ignored once the preamble is out
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if !self.header_written {
            self.headers.set(name, value);
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header_written(&self) -> bool {
        self.header_written
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Serialize `value` and write it as one frame
    pub async fn write_frame<V>(&mut self, value: &V) -> Result<()>
    where
        V: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(MarshalError::from)?;
        self.write_value(&value).await
    }

    /// Write an already-converted value as one frame
    pub async fn write_value(&mut self, value: &Value) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let mut frame = Vec::with_capacity(64);
        self.marshaller.marshal(value, &mut frame)?;
        frame.extend_from_slice(self.delimiter.as_bytes());

        self.write_preamble_if_pending();
        self.queue(&frame)?;

        let written = self.flush().await?;
        self.stats.record_frame(written);
        Ok(())
    }

    /// Write raw bytes after the preamble, without a delimiter
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        self.write_preamble_if_pending();
        self.queue(data)?;

        let written = self.flush().await?;
        self.stats.record_bytes(written);
        Ok(())
    }

    /// Check the peer is still there, see [`probe::probe`]
    pub async fn probe(&mut self, timeout: Duration) -> Result<()> {
        match probe::probe(&mut self.transport, timeout).await {
            Ok(()) => {
                self.stats.probes += 1;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::ConnectionClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Finish the response and shut the transport down.
    ///
    /// Writes the preamble if nothing was sent yet. Safe to call twice.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.write_preamble_if_pending();
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.finish(&mut self.buf)?;
        }

        let flushed = self.flush().await;
        if let Ok(written) = flushed {
            self.stats.record_bytes(written);
        }
        let shutdown = self.transport.shutdown().await;

        flushed?;
        shutdown?;
        Ok(())
    }

    /// Give the transport back, e.g. to inspect it in tests
    pub fn into_inner(self) -> T {
        self.transport
    }

    fn write_preamble_if_pending(&mut self) {
        if !self.header_written {
            write_preamble(&mut self.buf, self.status, &self.headers);
            self.header_written = true;
        }
    }

    fn queue(&mut self, payload: &[u8]) -> std::io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.encode(payload, &mut self.buf),
            None => {
                self.buf.put_slice(payload);
                Ok(())
            }
        }
    }

    async fn flush(&mut self) -> Result<usize> {
        let pending = self.buf.len();
        let transport = &mut self.transport;
        let buf = &self.buf;

        let result = tokio::time::timeout(self.write_timeout, async move {
            transport.write_all(buf).await?;
            transport.flush().await
        })
        .await;
        self.buf.clear();

        match result {
            Err(_elapsed) => Err(Error::WriteTimeout),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(())) => Ok(pending),
        }
    }
}

impl<T> std::fmt::Debug for StreamConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("status", &self.status)
            .field("mime", &self.marshaller.mime())
            .field("header_written", &self.header_written)
            .field("closed", &self.closed)
            .finish()
    }
}
