//! # Thread Control Block
//!
//! Thread identities, the per-thread state machine and the fixed-capacity
//! table that owns every TCB.
//!
//! ## State Machine
//!
//! ```text
//!             create                 scheduled
//!   Free ─────────────► Ready ───────────────────► Running
//!    ▲                  ▲  ▲  ◄─────── yield ──────┘  │  │
//!    │                  │  └──── wakeup ── Blocked ◄──┘  │ sleep
//!    │ exit by other    │                   │            │
//!    ├──────────────────┴───────────────────┘            │ exit self
//!    │                                                   ▼
//!    └──────────────── reclaimed ───────────────────  Zombie
//! ```
//!
//! A thread that destroys itself cannot free the stack it is running on, so
//! it parks in `Zombie` until some other context reclaims it. A thread
//! destroyed by another is not executing, so it goes straight to `Free`.

use core::fmt;

use crate::arch::Context;
use crate::config::MAX_THREADS;
use crate::error::Error;
use crate::stack::Stack;

// ---------------------------------------------------------------------------
// Thread identity
// ---------------------------------------------------------------------------

/// Identity of a logical thread, or one of the reserved sentinel values.
///
/// Valid identities are small non-negative integers (slot indices in the
/// thread table). The raw value is 64 bits wide, so values such as
/// `0xFFFF_FFFF` are simply out of range rather than aliasing a sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(i64);

impl Tid {
    /// Wildcard: some other existing thread.
    pub const ANY: Tid = Tid(-1);
    /// The calling thread.
    pub const SELF: Tid = Tid(-2);
    /// The argument did not name a usable thread.
    pub const INVALID: Tid = Tid(-3);
    /// A wildcard operation found nothing eligible.
    pub const NONE: Tid = Tid(-4);
    /// The thread table is full.
    pub const NOMORE: Tid = Tid(-5);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Tid(raw)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// `true` for real thread identities, `false` for every sentinel.
    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// The table slot this identity refers to, if it is in range.
    #[inline]
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok().filter(|&i| i < MAX_THREADS)
    }

    /// Convert a sentinel into an [`Error`] for `?`-style callers.
    ///
    /// `SELF` and `ANY` are targets, not results; they map to `Invalid`.
    pub fn into_result(self) -> Result<Tid, Error> {
        match self {
            t if t.is_ok() => Ok(t),
            Tid::NOMORE => Err(Error::NoMore),
            Tid::NONE => Err(Error::None),
            _ => Err(Error::Invalid),
        }
    }
}

impl From<usize> for Tid {
    fn from(index: usize) -> Self {
        Tid(index as i64)
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Tid::ANY => f.write_str("Tid::ANY"),
            Tid::SELF => f.write_str("Tid::SELF"),
            Tid::INVALID => f.write_str("Tid::INVALID"),
            Tid::NONE => f.write_str("Tid::NONE"),
            Tid::NOMORE => f.write_str("Tid::NOMORE"),
            Tid(raw) => write!(f, "Tid({raw})"),
        }
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One particular thread within a run.
///
/// A `Tid` names a slot, and slots are reused once their thread is gone.
/// The serial is handed out once per created thread, so two threads that
/// shared a slot never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Incarnation {
    pub(crate) tid: Tid,
    pub(crate) serial: u64,
}

// ---------------------------------------------------------------------------
// Thread state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Eligible to run; sitting in the ready queue.
    Ready,
    /// Currently executing. At most one thread is in this state.
    Running,
    /// Parked on exactly one wait queue.
    Blocked,
    /// Finished, but its stack has not been reclaimed yet.
    Zombie,
    /// The slot is unused.
    Free,
}

/// Work a thread runs when first scheduled.
///
/// Called through `&mut` so the box outlives the call and can be freed
/// with ticks masked.
pub(crate) type Entry = Box<dyn FnMut() + 'static>;

/// Wrap a one-shot closure as an [`Entry`]. Later calls do nothing.
pub(crate) fn entry<F>(f: F) -> Entry
where
    F: FnOnce() + 'static,
{
    let mut f = Some(f);
    Box::new(move || {
        if let Some(f) = f.take() {
            f();
        }
    })
}

// ---------------------------------------------------------------------------
// Thread Control Block
// ---------------------------------------------------------------------------

pub struct ThreadControlBlock {
    pub(crate) id: usize,
    pub(crate) state: ThreadState,
    /// Saved context. Its address must not change while the thread lives,
    /// which holds because TCBs sit in a table that never reallocates.
    pub(crate) context: Context,
    pub(crate) stack: Stack,
    /// Taken by the thread on its first run.
    pub(crate) entry: Option<Entry>,
    /// Arena slot of the wait queue this thread is blocked on.
    pub(crate) blocked_on: Option<usize>,
    /// Position of this thread in the run's creation order.
    pub(crate) serial: u64,
}

impl ThreadControlBlock {
    pub(crate) fn new(id: usize, serial: u64, stack: Stack, entry: Entry) -> Self {
        Self {
            id,
            state: ThreadState::Ready,
            context: Context::empty(),
            stack,
            entry: Some(entry),
            blocked_on: None,
            serial,
        }
    }

    #[inline]
    pub fn id(&self) -> Tid {
        Tid::from(self.id)
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        self.state
    }

    #[inline]
    pub(crate) fn incarnation(&self) -> Incarnation {
        Incarnation {
            tid: self.id(),
            serial: self.serial,
        }
    }
}

impl fmt::Debug for ThreadControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadControlBlock")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("blocked_on", &self.blocked_on)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Thread table
// ---------------------------------------------------------------------------

/// Fixed-capacity registry of TCBs, indexed by thread identity.
///
/// The slot array is allocated once and never resized, so a TCB (and the
/// context inside it) keeps its address from creation to reclamation.
pub struct ThreadTable {
    slots: Box<[Option<ThreadControlBlock>]>,
    live: usize,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_THREADS).map(|_| None).collect(),
            live: 0,
        }
    }

    /// Number of non-free slots.
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.live == self.slots.len()
    }

    /// Lowest free slot, if any.
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Install `tcb` in its slot. The slot must be free.
    pub fn insert(&mut self, tcb: ThreadControlBlock) -> &mut ThreadControlBlock {
        let slot = &mut self.slots[tcb.id];
        debug_assert!(slot.is_none(), "slot {} already in use", tcb.id);
        self.live += 1;
        slot.insert(tcb)
    }

    /// Remove the TCB in `index`, returning the slot to `Free`.
    pub fn remove(&mut self, index: usize) -> Option<ThreadControlBlock> {
        let tcb = self.slots.get_mut(index)?.take()?;
        self.live -= 1;
        Some(tcb)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&ThreadControlBlock> {
        self.slots.get(index)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ThreadControlBlock> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// State of `index`; out-of-range and empty slots report `Free`.
    pub fn state(&self, index: usize) -> ThreadState {
        self.get(index).map_or(ThreadState::Free, |t| t.state)
    }

    /// Iterate over occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = &ThreadControlBlock> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Remove every TCB, in slot order.
    pub fn drain(&mut self) -> Vec<ThreadControlBlock> {
        self.live = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
