//! Async connection handler for the Tokio runtime.

use crate::runtime::Timeouts;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Serve one client, reading into `buffer` and echoing every byte back.
///
/// Every read and write is bounded by the matching timeout; expiry is
/// reported as `io::ErrorKind::TimedOut`. Returns the number of bytes
/// echoed once the peer closes its side.
pub async fn serve<S>(stream: &mut S, buffer: &mut [u8], timeouts: Timeouts) -> io::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut echoed = 0u64;

    loop {
        // Read data from the socket
        let n = with_timeout(timeouts.read, stream.read(buffer)).await?;
        if n == 0 {
            with_timeout(timeouts.write, stream.shutdown()).await?;
            return Ok(echoed);
        }

        // Write back the data, resuming short writes
        let mut cursor = 0;
        while cursor < n {
            let written = with_timeout(timeouts.write, stream.write(&buffer[cursor..n])).await?;
            if written == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            cursor += written;
        }
        echoed += n as u64;
    }
}

/// Wrap a given `Future` to set a timeout duration. On timeout, the wrapped
/// `Future` is cancelled and the returned `Future` resolves to an `Err(_)`.
async fn with_timeout<F, T>(duration: Duration, f: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::time::timeout(duration, f)
        .await
        .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into()))
}
