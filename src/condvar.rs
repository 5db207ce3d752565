//! # Condition Variables
//!
//! Wait/signal/broadcast on top of a [`WaitQueue`]. A condition variable is
//! not bound to a lock; the lock is passed to every call and the caller
//! must hold it.

use log::warn;

use crate::kernel;
use crate::lock::Lock;
use crate::sync;
use crate::thread::{Incarnation, Tid};
use crate::wait_queue::WaitQueue;

#[derive(Debug)]
pub struct CondVar {
    waiters: WaitQueue,
}

impl CondVar {
    /// # Panics
    /// If called outside [`crate::run`].
    pub fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
        }
    }

    /// Release `lock`, block until signalled, then reacquire `lock`.
    ///
    /// The release and the block happen in one masked region, so a signal
    /// sent after the release cannot be missed. If no other thread can run
    /// the call returns at once (a spurious wakeup); callers re-check their
    /// predicate in a loop.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        sync::critical_section(|_| {
            let me = ensure_holder(lock, "wait");
            lock.release();
            if kernel::thread_sleep(Some(&self.waiters)) == Tid::NONE {
                warn!("thread {} waited on a condition variable with nothing else runnable", me.tid);
            }
            lock.acquire();
        });
    }

    /// Wake the longest waiter. Returns whether there was one.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn signal(&self, lock: &Lock) -> bool {
        sync::critical_section(|_| {
            ensure_holder(lock, "signal");
            kernel::wake_one(&self.waiters).is_some()
        })
    }

    /// Wake every waiter. Returns how many were woken.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock) -> usize {
        sync::critical_section(|_| {
            ensure_holder(lock, "broadcast");
            kernel::thread_wakeup(Some(&self.waiters), true)
        })
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_holder(lock: &Lock, op: &str) -> Incarnation {
    let me = kernel::current();
    if !lock.is_held_by(me) {
        panic!(
            "thread {} tried to {op} on a condition variable without holding the lock",
            me.tid
        );
    }
    me
}
