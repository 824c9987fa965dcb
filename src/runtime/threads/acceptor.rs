//! Blocking acceptor loop.

use super::handler::Transport;
use super::pool::WorkerPool;
use crate::runtime::{ConnId, Incoming, Listener};
use std::io;
use tracing::{debug, error, info, warn};

/// Owns the listening socket and feeds the worker pool.
pub struct Acceptor<L: Listener> {
    listener: L,
    pool: WorkerPool<L::Stream>,
    next_id: u64,
}

impl<L> Acceptor<L>
where
    L: Listener,
    L::Stream: Transport,
{
    pub fn new(listener: L, pool: WorkerPool<L::Stream>) -> Self {
        Self {
            listener,
            pool,
            next_id: 0,
        }
    }

    /// Accept clients forever. Returns only if a dispatch breaks the slot
    /// protocol, which is fatal.
    pub fn run(mut self) -> io::Result<()> {
        info!(addr = %self.listener.local_addr()?, "Accepting connections");

        loop {
            // Find a free worker
            let index = match self.pool.ready().try_ready() {
                Some(index) => index,
                None => {
                    debug!(workers = self.pool.len(), "All workers busy, waiting for a free slot");
                    self.pool.ready().wait_for_any_ready()
                }
            };

            let (stream, peer) = match self.listener.accept() {
                Ok(x) => x,
                Err(e) => {
                    // Mostly non-fatal, and no slot was consumed
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            self.next_id += 1;
            let incoming = Incoming::new(ConnId(self.next_id), peer, stream);

            self.pool.ready().mark_busy(index);
            if let Err(e) = self.pool.dispatch(index, incoming) {
                error!(
                    worker = index,
                    finished = self.pool.is_finished(index),
                    error = %e,
                    "Failed to dispatch connection"
                );
                return Err(e.into());
            }
        }
    }
}
