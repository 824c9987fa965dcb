//! Fixed pool of worker tasks.
//!
//! Same slot protocol as the thread backend: task `i` owns one buffer for
//! its whole life, and its inbox is a bounded mpsc channel of capacity 1 so
//! an activation that races the previous run's exit is held, not lost.

use super::handler::serve;
use crate::runtime::{DispatchError, Incoming, PoolConfig, ReadySet, ReleaseGuard, Timeouts};
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Handle to the running worker tasks, held by the acceptor.
pub struct TaskPool<S> {
    ready: Arc<ReadySet>,
    inboxes: Vec<mpsc::Sender<Incoming<S>>>,
}

impl<S> TaskPool<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Spawn `config.workers` tasks on the current runtime, all idle.
    pub fn spawn(config: PoolConfig) -> io::Result<Self> {
        let ready = Arc::new(ReadySet::new(config.workers)?);
        let mut inboxes = Vec::with_capacity(config.workers);

        for index in 0..config.workers {
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(worker(
                index,
                BytesMut::zeroed(config.buffer_size),
                config.timeouts,
                Arc::clone(&ready),
                rx,
            ));
            inboxes.push(tx);
        }

        info!(
            workers = config.workers,
            buffer_size = config.buffer_size,
            "Worker tasks started"
        );

        Ok(Self { ready, inboxes })
    }

    pub fn ready(&self) -> &ReadySet {
        &self.ready
    }

    pub fn len(&self) -> usize {
        self.ready.slots()
    }

    /// Hand `incoming` to slot `index` and activate it.
    ///
    /// The caller must have cleared the slot's ready bit.
    pub fn dispatch(&self, index: usize, incoming: Incoming<S>) -> Result<(), DispatchError> {
        let inbox = self
            .inboxes
            .get(index)
            .ok_or(DispatchError::OutOfRange(index))?;

        match inbox.try_send(incoming) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DispatchError::Pending(index)),
            Err(TrySendError::Closed(_)) => Err(DispatchError::WorkerGone(index)),
        }
    }
}

async fn worker<S>(
    index: usize,
    mut buffer: BytesMut,
    timeouts: Timeouts,
    ready: Arc<ReadySet>,
    mut inbox: mpsc::Receiver<Incoming<S>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(worker = index, "Worker task waiting for connections");

    while let Some(Incoming { id, peer, mut stream }) = inbox.recv().await {
        let _release = ReleaseGuard::new(&ready, index);

        info!(worker = index, conn = %id, peer = ?peer, "Serving client");
        match serve(&mut stream, &mut buffer, timeouts).await {
            Ok(bytes) => {
                info!(worker = index, conn = %id, bytes, "Finished serving client");
            }
            Err(e) => {
                info!(
                    worker = index,
                    conn = %id,
                    error = %e,
                    "Finished serving client with error"
                );
            }
        }

        drop(stream);
    }

    debug!(worker = index, "Worker task inbox closed");
}
