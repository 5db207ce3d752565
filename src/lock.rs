//! # Locks
//!
//! Mutual exclusion between green threads, built on a [`WaitQueue`] and
//! the kernel's blocking calls.
//!
//! Release hands the lock directly to the longest-waiting acquirer:
//!
//! ```text
//!  holder A            waiter B                 lock
//!  ────────            ────────                 ────
//!                      acquire() ──► sleep      held by A, queue [B]
//!  release() ─────────────────────────────────► held by B, queue []
//!                      ◄── woken, returns       held by B
//! ```
//!
//! so a thread that races in between cannot steal it, and the woken thread
//! never has to re-check.

use core::cell::Cell;

use log::{error, trace, warn};

use crate::kernel;
use crate::sync;
use crate::thread::{Incarnation, Tid};
use crate::wait_queue::WaitQueue;

/// A non-reentrant lock owned by at most one green thread at a time.
///
/// Share it between threads with `Rc`. Dropping a held lock while the run
/// is active panics.
///
/// The holder is recorded per thread, not per slot. If the holder is
/// destroyed with `thread_exit`, the next operation on the lock passes it
/// to the first waiter, or frees it, and a later thread that reuses the
/// slot does not inherit it.
#[derive(Debug)]
pub struct Lock {
    holder: Cell<Option<Incarnation>>,
    waiters: WaitQueue,
}

impl Lock {
    /// # Panics
    /// If called outside [`crate::run`].
    pub fn new() -> Self {
        Self {
            holder: Cell::new(None),
            waiters: WaitQueue::new(),
        }
    }

    /// Block until the caller holds the lock.
    ///
    /// # Panics
    /// If the caller already holds the lock, or if it would block with no
    /// other thread able to run.
    pub fn acquire(&self) {
        sync::critical_section(|_| {
            let me = kernel::current();
            match self.settle() {
                None => self.holder.set(Some(me)),
                Some(holder) if holder == me => {
                    panic!("thread {} tried to acquire a lock it already holds", me.tid)
                }
                Some(holder) => {
                    if kernel::thread_sleep(Some(&self.waiters)) == Tid::NONE {
                        error!("deadlock: thread {} waits for a lock held by {}", me.tid, holder.tid);
                        panic!(
                            "deadlock: thread {} waits for a lock held by {} and nothing else can run",
                            me.tid, holder.tid
                        );
                    }
                    debug_assert_eq!(self.holder.get(), Some(me));
                }
            }
        });
    }

    /// Take the lock if it is free. Never blocks.
    pub fn try_acquire(&self) -> bool {
        sync::critical_section(|_| {
            if self.settle().is_some() {
                return false;
            }
            self.holder.set(Some(kernel::current()));
            true
        })
    }

    /// Release the lock, handing it to the first waiter if there is one.
    ///
    /// # Panics
    /// If the caller does not hold the lock.
    pub fn release(&self) {
        sync::critical_section(|_| {
            let me = kernel::current();
            if self.settle() != Some(me) {
                panic!("thread {} released a lock it does not hold", me.tid);
            }
            let next = kernel::wake_one(&self.waiters);
            if let Some(next) = next {
                trace!("lock handed from thread {} to thread {}", me.tid, next.tid);
            }
            self.holder.set(next);
        });
    }

    /// The thread that holds the lock, if any.
    pub fn holder(&self) -> Option<Tid> {
        sync::critical_section(|_| self.settle().map(|h| h.tid))
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.holder().is_some()
    }

    pub(crate) fn is_held_by(&self, who: Incarnation) -> bool {
        sync::critical_section(|_| self.settle() == Some(who))
    }

    /// The live holder. A holder that no longer exists gives the lock up to
    /// the first waiter.
    fn settle(&self) -> Option<Incarnation> {
        let holder = self.holder.get()?;
        if kernel::is_alive(holder) {
            return Some(holder);
        }
        let next = if kernel::is_active() {
            kernel::wake_one(&self.waiters)
        } else {
            None
        };
        warn!(
            "thread {} is gone but held a lock; passing it to {:?}",
            holder.tid,
            next.map(|n| n.tid)
        );
        self.holder.set(next);
        next
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let Some(holder) = self.holder.get() {
            if kernel::is_alive(holder) && !std::thread::panicking() {
                panic!("lock dropped while held by thread {}", holder.tid);
            }
        }
    }
}
