//! Connections in flight between the acceptor and a worker slot.
//!
//! Ownership of an accepted stream moves into an `Incoming` and from there
//! into exactly one slot's activation inbox. The slot closes it; the
//! acceptor never touches it again.

use std::fmt;
use std::net::SocketAddr;

/// Identifies a connection. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An accepted connection on its way to a slot.
#[derive(Debug)]
pub struct Incoming<S> {
    pub id: ConnId,
    pub peer: Option<SocketAddr>,
    pub stream: S,
}

impl<S> Incoming<S> {
    pub fn new(id: ConnId, peer: Option<SocketAddr>, stream: S) -> Self {
        Self { id, peer, stream }
    }
}

/// Dispatch failures. Either one means the ready-set protocol is broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The slot already holds an activation that has not started yet.
    Pending(usize),
    /// The slot's worker has exited.
    WorkerGone(usize),
    /// No such slot.
    OutOfRange(usize),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Pending(i) => {
                write!(f, "worker {i} still has an undelivered connection")
            }
            DispatchError::WorkerGone(i) => write!(f, "worker {i} is no longer running"),
            DispatchError::OutOfRange(i) => write!(f, "worker {i} does not exist"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<DispatchError> for std::io::Error {
    fn from(e: DispatchError) -> Self {
        std::io::Error::other(e)
    }
}
