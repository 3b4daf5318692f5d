//! Crate error types
//!
//! Errors before a stream starts become ordinary HTTP responses. Errors after
//! the preamble has been written only ever end the stream.

use std::io;

use crate::codec::MarshalError;
use crate::pubsub::PubsubError;

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O failure (broken pipe, reset, bind failure, ...)
    Io(io::Error),
    /// Broker rejected a subscription
    Pubsub(PubsubError),
    /// A value could not be marshaled into a frame
    Marshal(MarshalError),
    /// The connection cannot be taken over for streaming
    HijackUnsupported(&'static str),
    /// Peer closed the connection
    ConnectionClosed,
    /// A frame write did not complete within the write timeout
    WriteTimeout,
    /// Request head could not be parsed
    BadRequest(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Pubsub(e) => write!(f, "{}", e),
            Error::Marshal(e) => write!(f, "{}", e),
            Error::HijackUnsupported(reason) => {
                write!(f, "Connection does not support hijacking: {}", reason)
            }
            Error::ConnectionClosed => write!(f, "Connection closed by peer"),
            Error::WriteTimeout => write!(f, "Write timed out"),
            Error::BadRequest(reason) => write!(f, "Bad request: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Pubsub(e) => Some(e),
            Error::Marshal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<PubsubError> for Error {
    fn from(e: PubsubError) -> Self {
        Error::Pubsub(e)
    }
}

impl From<MarshalError> for Error {
    fn from(e: MarshalError) -> Self {
        Error::Marshal(e)
    }
}

impl Error {
    /// Whether this error means the peer is gone rather than a local fault
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed | Error::WriteTimeout => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
