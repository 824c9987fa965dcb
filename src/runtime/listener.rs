//! Listening socket setup and the accept seam used by the acceptor.

use std::future::Future;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// Create a blocking TCP listener with SO_REUSEADDR and the given backlog.
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}

/// Source of connections for the blocking acceptor.
pub trait Listener: Send {
    type Stream: Send + 'static;

    /// Block until a connection arrives.
    fn accept(&self) -> io::Result<(Self::Stream, Option<SocketAddr>)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    fn accept(&self) -> io::Result<(TcpStream, Option<SocketAddr>)> {
        TcpListener::accept(self).map(|(stream, peer)| (stream, Some(peer)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Source of connections for the tokio acceptor.
pub trait AsyncListener: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait until a connection arrives.
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, Option<SocketAddr>)>> + Send;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl AsyncListener for tokio::net::TcpListener {
    type Stream = tokio::net::TcpStream;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, Option<SocketAddr>)>> + Send {
        async move {
            let (stream, peer) = tokio::net::TcpListener::accept(self).await?;
            Ok((stream, Some(peer)))
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::TcpListener::local_addr(self)
    }
}
