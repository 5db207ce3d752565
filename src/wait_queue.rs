//! # Wait Queues
//!
//! A wait queue is a FIFO of blocked threads. The storage for every queue
//! lives in an arena inside the scheduler; a [`WaitQueue`] is the owning
//! handle to one arena slot. Keeping the storage in the scheduler lets it
//! detach a blocked thread from its queue when another thread destroys it.
//!
//! Handles carry the epoch of the run that created them. A handle that
//! outlives its run (for example one captured by a closure that never got
//! to execute) is inert: dropping it does nothing and sleeping on it
//! returns `Tid::INVALID`.

use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::kernel;

// ---------------------------------------------------------------------------
// Arena (scheduler side)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct QueueArena {
    slots: Vec<Option<VecDeque<usize>>>,
    free: Vec<usize>,
}

impl QueueArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty queue and return its slot.
    pub(crate) fn create(&mut self) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(VecDeque::new());
                slot
            }
            None => {
                self.slots.push(Some(VecDeque::new()));
                self.slots.len() - 1
            }
        }
    }

    /// Free an empty queue. A non-empty queue is left in place and its
    /// length returned as the error.
    pub(crate) fn destroy(&mut self, slot: usize) -> Result<(), usize> {
        match self.slots.get(slot) {
            Some(Some(q)) if !q.is_empty() => Err(q.len()),
            Some(Some(_)) => {
                self.slots[slot] = None;
                self.free.push(slot);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    #[inline]
    pub(crate) fn contains(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }

    pub(crate) fn len(&self, slot: usize) -> usize {
        self.get(slot).map_or(0, VecDeque::len)
    }

    pub(crate) fn push(&mut self, slot: usize, tid: usize) {
        if let Some(q) = self.get_mut(slot) {
            q.push_back(tid);
        }
    }

    pub(crate) fn pop(&mut self, slot: usize) -> Option<usize> {
        self.get_mut(slot)?.pop_front()
    }

    /// Detach `tid` from the queue. Returns whether it was present.
    pub(crate) fn remove(&mut self, slot: usize, tid: usize) -> bool {
        let Some(q) = self.get_mut(slot) else {
            return false;
        };
        match q.iter().position(|&t| t == tid) {
            Some(pos) => {
                q.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of live queues.
    pub(crate) fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn get(&self, slot: usize) -> Option<&VecDeque<usize>> {
        self.slots.get(slot)?.as_ref()
    }

    fn get_mut(&mut self, slot: usize) -> Option<&mut VecDeque<usize>> {
        self.slots.get_mut(slot)?.as_mut()
    }
}

// ---------------------------------------------------------------------------
// Handle (caller side)
// ---------------------------------------------------------------------------

/// A FIFO queue that threads can block on with [`crate::thread_sleep`] and
/// be released from with [`crate::thread_wakeup`].
///
/// Created with [`WaitQueue::new`], destroyed on drop. Dropping a queue
/// that still has blocked threads is a programming error and panics.
///
/// ```ignore
/// let queue = Rc::new(WaitQueue::new());
/// let q = queue.clone();
/// thread_create(move || { thread_sleep(Some(&q)); });
/// thread_yield(Tid::ANY);
/// assert_eq!(thread_wakeup(Some(&queue), true), 1);
/// ```
#[derive(Debug)]
pub struct WaitQueue {
    slot: usize,
    epoch: u64,
    // Handles are tied to the OS thread that owns the runtime.
    _local: PhantomData<*const ()>,
}

impl WaitQueue {
    /// Create an empty queue.
    ///
    /// # Panics
    /// If called outside [`crate::run`].
    pub fn new() -> Self {
        let (slot, epoch) = kernel::queue_create();
        Self {
            slot,
            epoch,
            _local: PhantomData,
        }
    }

    /// Number of threads currently blocked on the queue.
    pub fn len(&self) -> usize {
        kernel::queue_len(self.slot, self.epoch)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        if let Err(blocked) = kernel::queue_destroy(self.slot, self.epoch) {
            if !std::thread::panicking() {
                panic!("wait queue destroyed with {blocked} blocked thread(s)");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
