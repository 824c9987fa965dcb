//! Blocking connection handler.
//!
//! Echoes one connection until EOF, an I/O error, or a timeout. Socket
//! timeouts are applied before any I/O; expiry surfaces as an ordinary
//! read/write error and ends only this connection.

use crate::runtime::Timeouts;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Byte stream a worker slot can serve.
pub trait Transport: Read + Write + Send + 'static {
    /// Apply per-connection read/write timeouts.
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> io::Result<()>;

    /// Orderly shutdown of both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(read))?;
        self.set_write_timeout(Some(write))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Serve one client, reading into `buffer` and echoing every byte back.
///
/// Returns the number of bytes echoed once the peer closes its side.
/// Doesn't take ownership of the stream; the caller closes it.
pub fn serve<T: Transport>(
    stream: &mut T,
    buffer: &mut [u8],
    timeouts: Timeouts,
) -> io::Result<u64> {
    stream.set_timeouts(timeouts.read, timeouts.write)?;

    let mut echoed = 0u64;
    loop {
        let n = match stream.read(buffer) {
            Ok(0) => {
                stream.shutdown()?;
                return Ok(echoed);
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        write_fully(stream, &buffer[..n])?;
        echoed += n as u64;
    }
}

/// Write all of `data`, resuming short writes from the unwritten offset.
fn write_fully<W: Write>(stream: &mut W, data: &[u8]) -> io::Result<()> {
    let mut cursor = 0;
    while cursor < data.len() {
        match stream.write(&data[cursor..]) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => cursor += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
