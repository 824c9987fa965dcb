//! Fixed pool of worker threads.
//!
//! Slot `i` is a named OS thread that owns its echo buffer for the life of
//! the process. Its activation inbox is a `sync_channel` of capacity 1: the
//! acceptor may dispatch as soon as the slot's ready bit is set, which can
//! be before the thread has looped back to `recv`. That activation waits in
//! the inbox and runs exactly once.

use super::handler::{serve, Transport};
use crate::runtime::{DispatchError, Incoming, PoolConfig, ReadySet, ReleaseGuard, Timeouts};
use bytes::BytesMut;
use std::io;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Handle to the running worker threads, held by the acceptor.
pub struct WorkerPool<S> {
    ready: Arc<ReadySet>,
    inboxes: Vec<SyncSender<Incoming<S>>>,
    handles: Vec<JoinHandle<()>>,
}

impl<S: Transport> WorkerPool<S> {
    /// Spawn `config.workers` slots, all idle.
    pub fn spawn(config: PoolConfig) -> io::Result<Self> {
        let ready = Arc::new(ReadySet::new(config.workers)?);
        let mut inboxes = Vec::with_capacity(config.workers);
        let mut handles = Vec::with_capacity(config.workers);

        for index in 0..config.workers {
            let (tx, rx) = sync_channel(1);
            let slot = WorkerSlot {
                index,
                buffer: BytesMut::zeroed(config.buffer_size),
                timeouts: config.timeouts,
                ready: Arc::clone(&ready),
                inbox: rx,
            };

            let handle = thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || slot.run())?;

            inboxes.push(tx);
            handles.push(handle);
        }

        info!(
            workers = config.workers,
            buffer_size = config.buffer_size,
            "Worker pool started"
        );

        Ok(Self {
            ready,
            inboxes,
            handles,
        })
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
            Err(TrySendError::Disconnected(_)) => Err(DispatchError::WorkerGone(index)),
        }
    }

    /// Whether the thread behind slot `index` has exited.
    pub fn is_finished(&self, index: usize) -> bool {
        self.handles
            .get(index)
            .map_or(true, JoinHandle::is_finished)
    }
}

/// One worker slot: fixed identity, one buffer, one inbox.
struct WorkerSlot<S> {
    index: usize,
    buffer: BytesMut,
    timeouts: Timeouts,
    ready: Arc<ReadySet>,
    inbox: Receiver<Incoming<S>>,
}

impl<S: Transport> WorkerSlot<S> {
    fn run(mut self) {
        debug!(worker = self.index, "Worker waiting for connections");
        while let Ok(incoming) = self.inbox.recv() {
            self.run_handler(incoming);
        }
        debug!(worker = self.index, "Worker inbox closed");
    }

    /// Serve one connection, close it, then release the slot.
    fn run_handler(&mut self, incoming: Incoming<S>) {
        let _release = ReleaseGuard::new(&self.ready, self.index);
        let Incoming {
            id,
            peer,
            mut stream,
        } = incoming;

        info!(worker = self.index, conn = %id, peer = ?peer, "Serving client");
        match serve(&mut stream, &mut self.buffer, self.timeouts) {
            Ok(bytes) => {
                info!(worker = self.index, conn = %id, bytes, "Finished serving client");
            }
            Err(e) => {
                info!(
                    worker = self.index,
                    conn = %id,
                    error = %e,
                    "Finished serving client with error"
                );
            }
        }

        // We own the stream, so closing it is up to us.
        drop(stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::threads::handler::tests::ScriptedStream;
    use crate::runtime::ConnId;
    use std::time::{Duration, Instant};

    fn pool(workers: usize) -> WorkerPool<ScriptedStream> {
        WorkerPool::spawn(PoolConfig {
            workers,
            buffer_size: 8,
            timeouts: Timeouts::default(),
        })
        .unwrap()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_dispatch_serves_and_releases() {
        let pool = pool(2);
        let stream = ScriptedStream::new(b"echo me please");
        let output = Arc::clone(&stream.output);

        let index = pool.ready().wait_for_any_ready();
        assert!(pool.ready().mark_busy(index));
        pool.dispatch(index, Incoming::new(ConnId(1), None, stream))
            .unwrap();

        wait_until(|| pool.ready().is_ready(index));
        assert_eq!(output.lock().unwrap().as_slice(), b"echo me please");
    }

    #[test]
    fn test_back_to_back_dispatch_runs_each_once() {
        let pool = pool(1);
        let mut outputs = Vec::new();

        for round in 0..20u64 {
            let index = pool.ready().wait_for_any_ready();
            assert_eq!(index, 0);
            assert!(pool.ready().mark_busy(index));

            let payload = format!("connection {round}");
            let stream = ScriptedStream::new(payload.as_bytes());
            outputs.push((payload, Arc::clone(&stream.output)));

            // The previous run may still be unwinding its loop; the inbox
            // must hold this activation rather than reject it.
            pool.dispatch(index, Incoming::new(ConnId(round), None, stream))
                .unwrap();
        }

        wait_until(|| pool.ready().is_ready(0));
        for (payload, output) in outputs {
            assert_eq!(output.lock().unwrap().as_slice(), payload.as_bytes());
        }
    }

    /// Blocks in its first read until released.
    struct GatedStream {
        started: std::sync::mpsc::Sender<()>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl io::Read for GatedStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            Ok(0)
        }
    }

    impl io::Write for GatedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for GatedStream {
        fn set_timeouts(&mut self, _read: Duration, _write: Duration) -> io::Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_inbox_holds_exactly_one_pending_activation() {
        let pool: WorkerPool<GatedStream> = WorkerPool::spawn(PoolConfig {
            workers: 1,
            buffer_size: 8,
            timeouts: Timeouts::default(),
        })
        .unwrap();

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let (pending_release_tx, pending_release_rx) = std::sync::mpsc::channel();
        let (rejected_release_tx, rejected_release_rx) = std::sync::mpsc::channel();

        let running = GatedStream {
            started: started_tx.clone(),
            release: release_rx,
        };
        pool.dispatch(0, Incoming::new(ConnId(1), None, running))
            .unwrap();
        started_rx.recv().unwrap();

        // Worker is busy: one activation queues up behind it.
        let pending = GatedStream {
            started: started_tx.clone(),
            release: pending_release_rx,
        };
        pool.dispatch(0, Incoming::new(ConnId(2), None, pending))
            .unwrap();

        let rejected = GatedStream {
            started: started_tx,
            release: rejected_release_rx,
        };
        assert_eq!(
            pool.dispatch(0, Incoming::new(ConnId(3), None, rejected))
                .unwrap_err(),
            DispatchError::Pending(0)
        );
        drop(rejected_release_tx);

        // The queued activation runs once the first one finishes.
        release_tx.send(()).unwrap();
        started_rx.recv().unwrap();
        pending_release_tx.send(()).unwrap();

        assert!(!pool.is_finished(0));
        assert_eq!(
            pool.dispatch(7, Incoming::new(ConnId(4), None, {
                let (started, _) = std::sync::mpsc::channel();
                let (_, release) = std::sync::mpsc::channel();
                GatedStream { started, release }
            }))
            .unwrap_err(),
            DispatchError::OutOfRange(7)
        );
    }

    #[test]
    fn test_slot_reuse_has_no_residue() {
        let pool = pool(1);

        let first = ScriptedStream::new(b"AAAAAAAAAAAA");
        let first_out = Arc::clone(&first.output);
        pool.ready().mark_busy(0);
        pool.dispatch(0, Incoming::new(ConnId(1), None, first)).unwrap();
        wait_until(|| pool.ready().is_ready(0));

        let second = ScriptedStream::new(b"b");
        let second_out = Arc::clone(&second.output);
        pool.ready().mark_busy(0);
        pool.dispatch(0, Incoming::new(ConnId(2), None, second)).unwrap();
        wait_until(|| pool.ready().is_ready(0));

        assert_eq!(first_out.lock().unwrap().as_slice(), b"AAAAAAAAAAAA");
        assert_eq!(second_out.lock().unwrap().as_slice(), b"b");
    }
}
