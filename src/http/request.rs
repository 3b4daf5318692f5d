//! HTTP/1.x request head parsing
//!
//! Reads the request line and header block off a raw transport, then the body
//! if a `Content-Length` is given. Anything buffered past the body is left
//! unread from the caller's point of view; streaming connections never read
//! request data after the head.
//!
//! The head is parsed by hand rather than through a general HTTP stack: the
//! raw transport has to stay with the caller so a streaming endpoint can take
//! it over, and the request line must admit any `HTTP/x.y` so that non-1.x
//! clients reach the hijack check instead of failing at parse time.

use std::io;
use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::form_urlencoded;

use super::headers::Headers;
use super::status::StatusCode;

/// Protocol version from the request line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// Size limits applied while reading a request
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    /// Maximum bytes for the request line plus headers
    pub max_head_size: usize,
    /// Maximum `Content-Length` accepted
    pub max_body_size: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_head_size: 8 * 1024,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Error type for request reading
#[derive(Debug)]
pub enum RequestError {
    /// Request line or a header line could not be parsed
    Malformed(&'static str),
    /// Head exceeded `max_head_size`
    HeadTooLarge,
    /// `Content-Length` exceeded `max_body_size`
    BodyTooLarge(usize),
    /// Body framing we do not handle (chunked uploads)
    UnsupportedBody,
    /// Peer closed mid-request
    Truncated,
    /// Transport failure
    Io(io::Error),
}

impl RequestError {
    /// Status to answer with, if the connection is still usable
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RequestError::Malformed(_) => Some(StatusCode::BAD_REQUEST),
            RequestError::HeadTooLarge => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            RequestError::BodyTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            RequestError::UnsupportedBody => Some(StatusCode::NOT_IMPLEMENTED),
            RequestError::Truncated | RequestError::Io(_) => None,
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Malformed(what) => write!(f, "Malformed request: {}", what),
            RequestError::HeadTooLarge => write!(f, "Request head too large"),
            RequestError::BodyTooLarge(len) => write!(f, "Request body too large: {} bytes", len),
            RequestError::UnsupportedBody => write!(f, "Chunked request bodies are not supported"),
            RequestError::Truncated => write!(f, "Connection closed mid-request"),
            RequestError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        RequestError::Io(e)
    }
}

impl From<RequestError> for crate::error::Error {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Io(e) => crate::error::Error::Io(e),
            RequestError::Truncated => crate::error::Error::ConnectionClosed,
            other => crate::error::Error::BadRequest(other.to_string()),
        }
    }
}

/// A parsed HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    /// Raw request target, e.g. `/watch/123?room=a`
    pub target: String,
    /// Path component of the target, still percent-encoded so that an
    /// escaped `/` does not split a segment
    pub path: String,
    /// Decoded query pairs, in order
    pub query: Vec<(String, String)>,
    pub version: Version,
    pub headers: Headers,
    pub body: Bytes,
    pub peer_addr: Option<SocketAddr>,
}

impl Request {
    /// Build a request without a transport, mostly for routing and tests
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method: method.to_string(),
            target: target.to_string(),
            path,
            query,
            version: Version::HTTP_11,
            headers: Headers::new(),
            body: Bytes::new(),
            peer_addr: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// First value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated query parameter (`?room=a&room=b`)
    pub fn query_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.query
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Method used for routing; a `_method` query parameter overrides the
    /// request line so clients limited to GET/POST can reach other verbs.
    pub fn effective_method(&self) -> &str {
        self.query_param("_method").unwrap_or(&self.method)
    }

    /// Parse a complete head (request line + headers, without the blank line)
    pub fn parse_head(head: &[u8]) -> Result<Self, RequestError> {
        let text =
            std::str::from_utf8(head).map_err(|_| RequestError::Malformed("head is not UTF-8"))?;
        let mut lines = text.split("\r\n");

        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(RequestError::Malformed("request line"));
        };
        if method.is_empty() || !target.starts_with('/') {
            return Err(RequestError::Malformed("request line"));
        }

        let mut request = Request::new(method, target);
        request.version = parse_version(version)?;

        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(RequestError::Malformed("header line"))?;
            let name = name.trim();
            if name.is_empty() || name.contains(' ') {
                return Err(RequestError::Malformed("header name"));
            }
            request.headers.append(name, value.trim());
        }

        Ok(request)
    }

    /// Read one request from `reader`.
    ///
    /// Returns `Ok(None)` if the peer closed the connection before sending
    /// a single byte.
    pub async fn read_from<R>(
        reader: &mut R,
        limits: &RequestLimits,
    ) -> Result<Option<Self>, RequestError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::with_capacity(1024);

        let head_end = loop {
            if let Some(pos) = find_head_end(&buf) {
                break pos;
            }
            if buf.len() > limits.max_head_size {
                return Err(RequestError::HeadTooLarge);
            }
            if reader.read_buf(&mut buf).await? == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(RequestError::Truncated);
            }
        };
        if head_end > limits.max_head_size {
            return Err(RequestError::HeadTooLarge);
        }

        let mut request = Self::parse_head(&buf[..head_end])?;
        buf.advance(head_end + 4);

        if request
            .header("Transfer-Encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
        {
            return Err(RequestError::UnsupportedBody);
        }

        let content_length = match request.header("Content-Length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| RequestError::Malformed("Content-Length"))?,
            None => 0,
        };
        if content_length > limits.max_body_size {
            return Err(RequestError::BodyTooLarge(content_length));
        }

        while buf.len() < content_length {
            if reader.read_buf(&mut buf).await? == 0 {
                return Err(RequestError::Truncated);
            }
        }
        request.body = buf.split_to(content_length).freeze();

        Ok(Some(request))
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_version(version: &str) -> Result<Version, RequestError> {
    let digits = version
        .strip_prefix("HTTP/")
        .ok_or(RequestError::Malformed("version"))?;
    let (major, minor) = digits
        .split_once('.')
        .ok_or(RequestError::Malformed("version"))?;

    match (major.parse::<u8>(), minor.parse::<u8>()) {
        (Ok(major), Ok(minor)) => Ok(Version { major, minor }),
        _ => Err(RequestError::Malformed("version")),
    }
}

fn split_target(target: &str) -> (String, Vec<(String, String)>) {
    let (path, raw_query) = target.split_once('?').unwrap_or((target, ""));

    let query = form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect();

    (path.to_string(), query)
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[test]
    fn test_parse_head() {
        let head = b"GET /watch/123?room=a&room=b%20c HTTP/1.1\r\nHost: localhost\r\nAccept: text/plain";
        let request = Request::parse_head(head).unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/watch/123");
        assert_eq!(request.version, Version::HTTP_11);
        assert_eq!(request.header("accept"), Some("text/plain"));
        let rooms: Vec<&str> = request.query_all("room").collect();
        assert_eq!(rooms, vec!["a", "b c"]);
    }

    #[test]
    fn test_parse_head_rejects_garbage() {
        assert!(matches!(
            Request::parse_head(b"GET"),
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            Request::parse_head(b"GET / HTTP/1.1 extra"),
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            Request::parse_head(b"GET / SPDY/3"),
            Err(RequestError::Malformed(_))
        ));
        assert!(matches!(
            Request::parse_head(b"GET / HTTP/1.1\r\nno colon here"),
            Err(RequestError::Malformed(_))
        ));
    }

    #[test]
    fn test_method_override() {
        let request = Request::new("POST", "/items/1?_method=DELETE");
        assert_eq!(request.effective_method(), "DELETE");
        assert_eq!(Request::new("GET", "/").effective_method(), "GET");
    }

    #[test]
    fn test_query_decoding() {
        let request = Request::new("GET", "/rooms/a%2Fb?room=a+b&room=%41&flag&bad=100%");

        assert_eq!(request.path, "/rooms/a%2Fb");
        let rooms: Vec<&str> = request.query_all("room").collect();
        assert_eq!(rooms, vec!["a b", "A"]);
        assert_eq!(request.query_param("flag"), Some(""));
        assert_eq!(request.query_param("bad"), Some("100%"));
        assert_eq!(request.query_param("missing"), None);
    }

    #[tokio::test]
    async fn test_read_with_body() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"POST /publish/123 HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();

        let request = Request::read_from(&mut server, &RequestLimits::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(&request.body[..], b"hello");
    }

    #[tokio::test]
    async fn test_read_empty_connection() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let request = Request::read_from(&mut server, &RequestLimits::default())
            .await
            .unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_read_truncated() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"GET / HTTP/1.1\r\nHo").await.unwrap();
        drop(client);

        let result = Request::read_from(&mut server, &RequestLimits::default()).await;
        assert!(matches!(result, Err(RequestError::Truncated)));
    }

    #[tokio::test]
    async fn test_head_limit() {
        let limits = RequestLimits {
            max_head_size: 32,
            max_body_size: 1024,
        };

        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n")
            .await
            .unwrap();
        let result = Request::read_from(&mut server, &limits).await;
        assert!(matches!(result, Err(RequestError::HeadTooLarge)));
        assert_eq!(
            result.unwrap_err().status(),
            Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE)
        );
    }

    #[tokio::test]
    async fn test_body_limit() {
        let limits = RequestLimits {
            max_head_size: 64,
            max_body_size: 4,
        };

        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nfits")
            .await
            .unwrap();
        let request = Request::read_from(&mut server, &limits).await.unwrap().unwrap();
        assert_eq!(&request.body[..], b"fits");

        let (mut client, mut server) = tokio::io::duplex(1024);
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n")
            .await
            .unwrap();
        let result = Request::read_from(&mut server, &limits).await;
        assert!(matches!(result, Err(RequestError::BodyTooLarge(10))));
        assert_eq!(
            result.unwrap_err().status(),
            Some(StatusCode::PAYLOAD_TOO_LARGE)
        );
    }
}
