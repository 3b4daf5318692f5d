//! One request and the transport it arrived on
//!
//! A plain endpoint answers through [`Exchange::respond`]. A streaming
//! endpoint takes the transport out with [`Exchange::hijack`] and from then on
//! owns all framing on it.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::http::{Request, Response};

pub struct Exchange<T> {
    request: Request,
    transport: Option<T>,
}

impl<T> Exchange<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(request: Request, transport: T) -> Self {
        Self {
            request,
            transport: Some(transport),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn is_hijacked(&self) -> bool {
        self.transport.is_none()
    }

    /// Take the raw transport.
    ///
    /// Only HTTP/1.x connections can be taken over, and only once.
    pub fn hijack(&mut self) -> Result<T> {
        if self.request.version.major != 1 {
            return Err(Error::HijackUnsupported("protocol is not HTTP/1.x"));
        }
        self.transport
            .take()
            .ok_or(Error::HijackUnsupported("connection already hijacked"))
    }

    /// Write a buffered response and shut the connection down
    pub async fn respond(&mut self, response: &Response) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;

        let mut buf = BytesMut::with_capacity(256 + response.body.len());
        response.write_to(&mut buf);
        transport.write_all(&buf).await?;
        transport.shutdown().await?;
        Ok(())
    }
}
