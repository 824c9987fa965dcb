//! Ready-set coordinator.
//!
//! One bit per worker slot, set while the slot is idle. The acceptor is the
//! only consumer: it waits for any bit, picks the lowest, and clears it
//! before dispatching. Slots set their own bit as the last step of a
//! handler invocation, through `ReleaseGuard`.
//!
//! The bitmask itself is an `AtomicU64`. The mutex/condvar pair and the
//! tokio `Notify` exist only to park a waiting acceptor; they guard no data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use tokio::sync::Notify;

/// Widest pool the bitmask can describe.
pub const MAX_SLOTS: usize = u64::BITS as usize;

/// Idle/busy state of every slot in the pool.
pub struct ReadySet {
    bits: AtomicU64,
    slots: usize,
    lock: Mutex<()>,
    cond: Condvar,
    notify: Notify,
}

impl ReadySet {
    /// Create a ready set with every slot idle.
    pub fn new(slots: usize) -> Result<Self, ReadySetError> {
        if slots == 0 {
            return Err(ReadySetError::Empty);
        }
        if slots > MAX_SLOTS {
            return Err(ReadySetError::TooWide(slots));
        }

        let all = if slots == MAX_SLOTS {
            u64::MAX
        } else {
            (1u64 << slots) - 1
        };

        Ok(Self {
            bits: AtomicU64::new(all),
            slots,
            lock: Mutex::new(()),
            cond: Condvar::new(),
            notify: Notify::new(),
        })
    }

    /// Number of slots tracked.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Current bitmask, bit `i` set while slot `i` is idle.
    pub fn snapshot(&self) -> u64 {
        self.bits.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn is_ready(&self, index: usize) -> bool {
        self.snapshot() & bit(index) != 0
    }

    /// Lowest idle slot, if any, without waiting or modifying the set.
    pub fn try_ready(&self) -> Option<usize> {
        let bits = self.snapshot();
        if bits == 0 {
            None
        } else {
            Some(bits.trailing_zeros() as usize)
        }
    }

    /// Block the calling thread until some slot is idle and return it.
    ///
    /// The set is left unchanged; the caller must `mark_busy` the returned
    /// slot before handing it work.
    pub fn wait_for_any_ready(&self) -> usize {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(index) = self.try_ready() {
                return index;
            }
            guard = self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Async counterpart of `wait_for_any_ready`.
    pub async fn wait_for_any_ready_async(&self) -> usize {
        loop {
            let notified = self.notify.notified();
            if let Some(index) = self.try_ready() {
                return index;
            }
            notified.await;
        }
    }

    /// Clear the bit for `index`. Returns whether the slot was idle.
    pub fn mark_busy(&self, index: usize) -> bool {
        let prev = self.bits.fetch_and(!bit(index), Ordering::AcqRel);
        prev & bit(index) != 0
    }

    /// Set the bit for `index` and wake a waiting acceptor.
    pub fn mark_ready(&self, index: usize) {
        self.bits.fetch_or(bit(index), Ordering::Release);

        // Taking the lock orders this wakeup after a waiter that already
        // checked the mask has parked on the condvar.
        drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.cond.notify_one();
        self.notify.notify_one();
    }
}

impl std::fmt::Debug for ReadySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadySet")
            .field("slots", &self.slots)
            .field("bits", &format_args!("{:#b}", self.snapshot()))
            .finish()
    }
}

fn bit(index: usize) -> u64 {
    debug_assert!(index < MAX_SLOTS, "slot index out of range");
    1u64 << index
}

/// Marks a slot ready when dropped.
///
/// Held for the whole of a handler invocation so the slot is released on
/// every exit path, unwinding included.
pub struct ReleaseGuard<'a> {
    ready: &'a ReadySet,
    index: usize,
}

impl<'a> ReleaseGuard<'a> {
    pub fn new(ready: &'a ReadySet, index: usize) -> Self {
        Self { ready, index }
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.ready.mark_ready(self.index);
    }
}

/// Ready-set construction errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadySetError {
    Empty,
    TooWide(usize),
}

impl std::fmt::Display for ReadySetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadySetError::Empty => write!(f, "worker pool must have at least one slot"),
            ReadySetError::TooWide(n) => {
                write!(f, "worker pool of {n} slots exceeds the {MAX_SLOTS}-bit ready mask")
            }
        }
    }
}

impl std::error::Error for ReadySetError {}

impl From<ReadySetError> for std::io::Error {
    fn from(e: ReadySetError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    }
}
