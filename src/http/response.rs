//! Buffered (non-streaming) responses

use bytes::{BufMut, Bytes, BytesMut};

use super::headers::Headers;
use super::status::StatusCode;

/// Write `HTTP/1.1 <code> <reason>\r\n`, the header block and the blank line
pub fn write_preamble(buf: &mut BytesMut, status: StatusCode, headers: &Headers) {
    buf.put_slice(b"HTTP/1.1 ");
    buf.put_slice(status.as_u16().to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(status.reason().as_bytes());
    buf.put_slice(b"\r\n");
    headers.write_to(buf);
    buf.put_slice(b"\r\n");
}

/// A complete response written in one go, after which the connection closes
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text response carrying `message` followed by a newline
    pub fn text(status: StatusCode, message: impl AsRef<str>) -> Self {
        let mut body = message.as_ref().to_string();
        body.push('\n');
        Self::new(status).body(body, "text/plain; charset=utf-8")
    }

    /// Status-only response whose body is the reason phrase
    pub fn status(status: StatusCode) -> Self {
        Self::text(status, status.reason())
    }

    /// Set a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Set the body and its content type
    pub fn body(mut self, body: impl Into<Bytes>, content_type: &str) -> Self {
        self.body = body.into();
        self.headers.set("Content-Type", content_type);
        self
    }

    /// Serialize with `Content-Length` and `Connection: close`
    pub fn write_to(&self, buf: &mut BytesMut) {
        let mut headers = self.headers.clone();
        headers.set("Content-Length", self.body.len().to_string());
        headers.set("Connection", "close");

        write_preamble(buf, self.status, &headers);
        buf.put_slice(&self.body);
    }
}
