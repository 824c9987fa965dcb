//! Fixed-slot echo runtime.
//!
//! A single acceptor owns the listening socket and hands every accepted
//! connection to one of N worker slots. Slots are created once at startup
//! and never reallocated; which of them are idle is tracked by a `ReadySet`
//! bitmask. The acceptor only blocks waiting for *some* slot to become idle,
//! never on a particular connection.
//!
//! Two backends share this protocol:
//! - `threads`: one OS thread per slot, blocking sockets
//! - `tokio_impl`: one tokio task per slot
//!
//! Both share common abstractions:
//! - `ReadySet`: idle/busy bitmask with blocking and async waits
//! - `Incoming`: a connection in flight from acceptor to slot
//! - `bind_listener`: listener socket setup
//! - `Listener`/`AsyncListener`: the accept seam each acceptor pulls from

mod connection;
mod listener;
mod ready;
pub mod threads;
pub mod tokio_impl;

pub(crate) use connection::{ConnId, DispatchError, Incoming};
pub(crate) use listener::{bind_listener, AsyncListener, Listener};
pub(crate) use ready::{ReadySet, ReleaseGuard, MAX_SLOTS};

use crate::config::{Config, RuntimeType};
use std::time::Duration;

/// Per-connection socket timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(30),
            write: Duration::from_secs(30),
        }
    }
}

/// Geometry of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of slots, at most `MAX_SLOTS`.
    pub workers: usize,
    /// Capacity of each slot's echo buffer.
    pub buffer_size: usize,
    pub timeouts: Timeouts,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            buffer_size: 4096,
            timeouts: Timeouts::default(),
        }
    }
}

/// Run the server with the configured backend. Only returns on a setup
/// failure or a broken slot invariant.
pub fn run(config: &Config) -> std::io::Result<()> {
    let listener = bind_listener(config.listen, config.backlog)?;

    match config.runtime {
        RuntimeType::Threads => threads::run(listener, config.pool()),
        RuntimeType::Tokio => tokio_impl::run(listener, config.pool()),
    }
}
