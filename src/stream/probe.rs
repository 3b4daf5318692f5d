//! Peer liveness check for write-only connections
//!
//! A stream never reads from its peer, so a half-closed socket would only be
//! noticed on the next failed write. The probe does a single one-byte read
//! with a short deadline instead: timing out means the peer is idle but
//! present, EOF means it is gone.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Probe `transport` once.
///
/// Returns `Ok(())` when the peer looks alive. A byte that arrives is
/// consumed and discarded; clients are not expected to send anything, so
/// any data counts as a sign of life. EOF is reported as
/// [`io::ErrorKind::UnexpectedEof`].
pub async fn probe<T>(transport: &mut T, timeout: Duration) -> io::Result<()>
where
    T: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];

    match tokio::time::timeout(timeout, transport.read(&mut byte)).await {
        Err(_elapsed) => Ok(()),
        Ok(Ok(0)) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed the connection",
        )),
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
    }
}
