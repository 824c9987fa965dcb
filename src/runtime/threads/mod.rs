//! Thread-per-slot backend.
//!
//! Blocking sockets with SO_RCVTIMEO/SO_SNDTIMEO. The calling thread
//! becomes the acceptor; each slot is a `worker-{i}` thread.

mod acceptor;
mod handler;
mod pool;

use acceptor::Acceptor;
use pool::WorkerPool;

use crate::runtime::PoolConfig;
use std::io;
use std::net::{TcpListener, TcpStream};
use tracing::info;

/// Run the server on `listener` with blocking worker threads.
pub fn run(listener: TcpListener, config: PoolConfig) -> io::Result<()> {
    info!(workers = config.workers, "Starting thread-per-slot runtime");

    let pool: WorkerPool<TcpStream> = WorkerPool::spawn(config)?;
    Acceptor::new(listener, pool).run()
}
