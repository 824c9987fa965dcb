//! Tokio backend.
//!
//! One long-lived task per slot instead of one task per connection, so the
//! pool bound and buffer reuse match the thread backend exactly. Timeouts
//! are enforced with `tokio::time::timeout` rather than socket options.

mod handler;
mod pool;

use pool::TaskPool;

use crate::runtime::{AsyncListener, ConnId, Incoming, PoolConfig};
use std::io;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Run the server on `listener` inside a fresh multi-threaded runtime.
pub fn run(listener: std::net::TcpListener, config: PoolConfig) -> io::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("tokio-worker")
        .enable_all()
        .build()?;

    rt.block_on(serve_forever(listener, config))
}

/// Accept clients forever on the current runtime. Returns only on a setup
/// failure or a broken slot invariant.
pub async fn serve_forever(listener: std::net::TcpListener, config: PoolConfig) -> io::Result<()> {
    listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(listener)?;
    accept_loop(listener, config).await
}

/// Acceptor loop over any `AsyncListener`: wait for an idle slot, accept,
/// number, mark busy, dispatch. Accept failures are logged and retried.
pub async fn accept_loop<L: AsyncListener>(listener: L, config: PoolConfig) -> io::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        workers = config.workers,
        "Starting tokio runtime"
    );

    let pool: TaskPool<L::Stream> = TaskPool::spawn(config)?;
    let mut next_id = 0u64;

    loop {
        // Find a free worker
        let index = match pool.ready().try_ready() {
            Some(index) => index,
            None => {
                debug!(workers = pool.len(), "All workers busy, waiting for a free slot");
                pool.ready().wait_for_any_ready_async().await
            }
        };

        let (stream, peer) = match listener.accept().await {
            Ok(x) => x,
            Err(e) => {
                // Mostly non-fatal, and no slot was consumed
                warn!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        next_id += 1;
        let incoming = Incoming::new(ConnId(next_id), peer, stream);

        pool.ready().mark_busy(index);
        if let Err(e) = pool.dispatch(index, incoming) {
            error!(worker = index, error = %e, "Failed to dispatch connection");
            return Err(e.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{bind_listener, Timeouts};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start(config: PoolConfig) -> SocketAddr {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_forever(listener, config));
        addr
    }

    fn config(workers: usize) -> PoolConfig {
        PoolConfig {
            workers,
            buffer_size: 4096,
            timeouts: Timeouts {
                read: Duration::from_secs(10),
                write: Duration::from_secs(10),
            },
        }
    }

    async fn roundtrip(client: &mut TcpStream, payload: &[u8]) {
        client.write_all(payload).await.unwrap();
        let mut echoed = vec![0u8; payload.len()];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, payload);
    }

    #[tokio::test]
    async fn test_large_payload_roundtrip() {
        let addr = start(config(2)).await;
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i * 13 % 256) as u8).collect();

        let client = TcpStream::connect(addr).await.unwrap();
        let (mut reader, mut writer) = client.into_split();
        let expected = payload.clone();
        let sender = tokio::spawn(async move {
            writer.write_all(&payload).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        let mut echoed = Vec::new();
        reader.read_to_end(&mut echoed).await.unwrap();
        sender.await.unwrap();

        assert_eq!(echoed, expected);
    }

    #[tokio::test]
    async fn test_pool_bound_defers_extra_connection() {
        let addr = start(config(1)).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut first, b"first").await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"second").await.unwrap();
        let mut buf = [0u8; 6];
        let stalled =
            tokio::time::timeout(Duration::from_millis(300), second.read(&mut buf)).await;
        assert!(stalled.is_err(), "extra connection was served early");

        drop(first);

        tokio::time::timeout(Duration::from_secs(5), second.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"second");
    }

    #[tokio::test]
    async fn test_idle_client_is_closed() {
        let addr = start(PoolConfig {
            workers: 2,
            buffer_size: 64,
            timeouts: Timeouts {
                read: Duration::from_millis(200),
                write: Duration::from_secs(5),
            },
        })
        .await;

        let mut idle = TcpStream::connect(addr).await.unwrap();
        let mut active = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut active, b"busy").await;

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), idle.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        let mut again = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut again, b"fresh").await;
    }

    /// Fails the first `failures` accepts, then delegates.
    struct FlakyListener {
        inner: TcpListener,
        failures: AtomicUsize,
        attempts: Arc<AtomicUsize>,
    }

    impl AsyncListener for FlakyListener {
        type Stream = TcpStream;

        async fn accept(&self) -> io::Result<(TcpStream, Option<SocketAddr>)> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let injected = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "injected"));
            }
            AsyncListener::accept(&self.inner).await
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            AsyncListener::local_addr(&self.inner)
        }
    }

    #[tokio::test]
    async fn test_accept_failure_is_not_fatal() {
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = inner.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let listener = FlakyListener {
            inner,
            failures: AtomicUsize::new(1),
            attempts: Arc::clone(&attempts),
        };

        let server = tokio::spawn(accept_loop(listener, config(1)));

        for payload in [&b"still here"[..], b"and again"] {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(payload).await.unwrap();
            client.shutdown().await.unwrap();
            let mut echoed = Vec::new();
            tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut echoed))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(echoed, payload);
        }

        assert!(attempts.load(Ordering::SeqCst) >= 3);
        assert!(!server.is_finished());
    }
}
