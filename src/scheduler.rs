//! # Scheduler
//!
//! Core scheduling logic for GreenRT: a strict FIFO round-robin ready
//! queue over a fixed table of TCBs.
//!
//! The scheduler is pure bookkeeping. Every operation that gives up the
//! CPU is split in two:
//!
//! 1. **Plan** (`plan_yield`, `plan_sleep`, `plan_exit`): under the
//!    scheduler borrow, update states and queues and return either an
//!    immediate result or a committed [`Switch`].
//! 2. **Perform** (in `kernel`): release the borrow, then execute the
//!    switch. When the thread is resumed later, it calls
//!    [`Scheduler::after_switch`] to reclaim zombies.
//!
//! Both halves run inside one critical section, so a preemption tick can
//! never observe the queues half-updated.
//!
//! ## Reclamation
//!
//! A thread that exits itself is still executing on its stack while it
//! picks a successor, so it becomes a zombie. Zombies are reclaimed by the
//! next context to pass through the scheduler: the thread switched to, the
//! next create/yield/sleep/exit, or the host at teardown. Reclaimed TCBs
//! are parked in a graveyard and dropped by the kernel after it releases
//! the scheduler borrow, because dropping an unstarted entry closure runs
//! user code.

use std::any::Any;
use std::collections::VecDeque;
use std::mem;
use std::ptr;

use log::{debug, error, trace, warn};

use crate::arch::{self, Context, EntryFn};
use crate::config::RuntimeConfig;
use crate::stack::Stack;
use crate::thread::{Entry, Incarnation, ThreadControlBlock, ThreadState, ThreadTable, Tid};
use crate::wait_queue::QueueArena;

/// Payload of a panic raised by a green thread.
pub(crate) type Fault = Box<dyn Any + Send + 'static>;

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Counters accumulated over one [`crate::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Switches into a green thread.
    pub context_switches: u64,
    /// Switches caused by `thread_yield`.
    pub voluntary_yields: u64,
    /// Switches caused by a preemption tick.
    pub preemptions: u64,
    /// Ticks that arrived inside a critical section and were serviced late.
    pub deferred_ticks: u64,
    pub threads_created: u64,
    pub threads_reclaimed: u64,
}

// ---------------------------------------------------------------------------
// Planned transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cause {
    Voluntary,
    Preempted,
}

/// A context switch the scheduler has committed to.
///
/// Both pointers refer to contexts with stable addresses (a TCB slot or
/// the boxed host context) that stay alive at least until the switch has
/// been performed.
pub(crate) struct Switch {
    from: *const Context,
    to: *const Context,
}

impl Switch {
    /// # Safety
    /// Must be called on the stack of the context recorded as `from`, with
    /// the scheduler borrow released and ticks masked.
    pub(crate) unsafe fn perform(self) {
        arch::switch(&*self.from, &*self.to);
    }
}

pub(crate) enum Transition {
    /// No switch; the operation's result.
    Stay(Tid),
    /// Switch, then report the given thread to the caller once resumed.
    Switch(Tid, Switch),
}

pub(crate) enum Exit {
    /// Another thread was destroyed (or the sentinel result).
    Done(Tid),
    /// The caller is now a zombie; perform the switch and never return.
    Current(Switch),
}

enum Target {
    Caller,
    Any,
    Thread(usize),
    Invalid,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state: TCB table, ready queue, wait-queue arena,
/// and the host context that `run` suspended to start the first thread.
pub struct Scheduler {
    threads: ThreadTable,
    ready: VecDeque<usize>,
    queues: QueueArena,
    zombies: Vec<usize>,
    graveyard: Vec<ThreadControlBlock>,
    /// `None` while the host context is executing.
    running: Option<usize>,
    host: Box<Context>,
    start: EntryFn,
    stack_size: usize,
    epoch: u64,
    /// Serial for the next created thread.
    next_serial: u64,
    stats: SchedulerStats,
    fault: Option<Fault>,
}

// SAFETY: the scheduler holds raw stack pointers and non-Send closures, but
// it is only ever reached from the OS thread that owns the current run
// (enforced by the kernel), and always inside a critical section.
unsafe impl Send for Scheduler {}

impl Scheduler {
    /// Create an empty scheduler. Every thread created through it starts
    /// executing at `start`.
    pub fn new(config: &RuntimeConfig, start: EntryFn, epoch: u64) -> Self {
        Self {
            threads: ThreadTable::new(),
            ready: VecDeque::new(),
            queues: QueueArena::new(),
            zombies: Vec::new(),
            graveyard: Vec::new(),
            running: None,
            host: Box::new(Context::empty()),
            start,
            stack_size: config.effective_stack_size(),
            epoch,
            next_serial: 0,
            stats: SchedulerStats::default(),
            fault: None,
        }
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Index of the running thread; `None` while the host runs.
    #[inline]
    pub fn running(&self) -> Option<usize> {
        self.running
    }

    pub fn state(&self, tid: Tid) -> ThreadState {
        tid.index()
            .map_or(ThreadState::Free, |i| self.threads.state(i))
    }

    #[inline]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    #[inline]
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// The thread that occupies `index`, unless it is free or a zombie.
    pub(crate) fn incarnation(&self, index: usize) -> Option<Incarnation> {
        self.threads
            .get(index)
            .filter(|t| t.state != ThreadState::Zombie)
            .map(ThreadControlBlock::incarnation)
    }

    /// Whether `who` still exists and has not finished.
    pub(crate) fn is_alive(&self, who: Incarnation) -> bool {
        who.tid
            .index()
            .and_then(|i| self.incarnation(i))
            .is_some_and(|live| live == who)
    }

    // -----------------------------------------------------------------------
    // Creation and start-up
    // -----------------------------------------------------------------------

    /// Register a new thread at the tail of the ready queue.
    ///
    /// Returns `Tid::NOMORE` if every slot is taken after reclaiming
    /// zombies.
    pub(crate) fn create(&mut self, entry: Entry) -> Tid {
        self.reap();
        let Some(index) = self.threads.free_slot() else {
            debug!("thread table full, refusing to create");
            return Tid::NOMORE;
        };

        let serial = self.next_serial;
        self.next_serial += 1;
        let tcb = ThreadControlBlock::new(index, serial, Stack::new(self.stack_size), entry);
        let tcb = self.threads.insert(tcb);
        // SAFETY: the stack is owned by the TCB, which outlives its context.
        unsafe { tcb.context.prepare(&tcb.stack, self.start, ptr::null_mut()) };

        self.ready.push_back(index);
        self.stats.threads_created += 1;
        debug!("created thread {index}");
        Tid::from(index)
    }

    /// Leave the host context for the head of the ready queue.
    pub(crate) fn enter(&mut self) -> Option<Switch> {
        let next = self.ready.pop_front()?;
        let from = &*self.host as *const Context;
        Some(self.switch_in(from, next))
    }

    /// Hand the entry closure to the thread that just started running.
    pub(crate) fn take_entry(&mut self) -> Option<Entry> {
        let me = self.running?;
        self.threads.get_mut(me)?.entry.take()
    }

    /// Bookkeeping for the context that has just been resumed.
    pub(crate) fn after_switch(&mut self) {
        self.reap();
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Plan `thread_yield(target)`, or the involuntary yield of a tick.
    pub(crate) fn plan_yield(&mut self, target: Tid, cause: Cause) -> Transition {
        self.reap();
        let Some(me) = self.running else {
            return Transition::Stay(Tid::NONE);
        };

        let next = match self.resolve(target) {
            Target::Caller => return Transition::Stay(Tid::from(me)),
            Target::Invalid => return Transition::Stay(Tid::INVALID),
            Target::Any => match self.ready.pop_front() {
                Some(next) => next,
                None => return Transition::Stay(Tid::NONE),
            },
            Target::Thread(i) => {
                if self.threads.state(i) != ThreadState::Ready {
                    return Transition::Stay(Tid::INVALID);
                }
                self.remove_ready(i);
                i
            }
        };

        match cause {
            Cause::Voluntary => self.stats.voluntary_yields += 1,
            Cause::Preempted => self.stats.preemptions += 1,
        }
        self.check_stack(me);
        self.set_state(me, ThreadState::Ready);
        self.ready.push_back(me);

        let from = self.context_of(me);
        Transition::Switch(Tid::from(next), self.switch_in(from, next))
    }

    /// Plan `thread_sleep` on the queue in arena slot `slot`.
    pub(crate) fn plan_sleep(&mut self, slot: usize, epoch: u64) -> Transition {
        self.reap();
        if epoch != self.epoch || !self.queues.contains(slot) {
            return Transition::Stay(Tid::INVALID);
        }
        let Some(me) = self.running else {
            return Transition::Stay(Tid::NONE);
        };
        // Blocking with nothing else runnable would stall the whole runtime.
        let Some(next) = self.ready.pop_front() else {
            return Transition::Stay(Tid::NONE);
        };

        self.check_stack(me);
        if let Some(tcb) = self.threads.get_mut(me) {
            tcb.state = ThreadState::Blocked;
            tcb.blocked_on = Some(slot);
        }
        self.queues.push(slot, me);
        trace!("thread {me} blocked on queue {slot}");

        let from = self.context_of(me);
        Transition::Switch(Tid::from(next), self.switch_in(from, next))
    }

    /// Plan `thread_exit(target)`.
    pub(crate) fn plan_exit(&mut self, target: Tid) -> Exit {
        self.reap();
        let Some(me) = self.running else {
            return Exit::Done(Tid::NONE);
        };

        let victim = match self.resolve(target) {
            Target::Caller => return Exit::Current(self.retire(me)),
            Target::Invalid => return Exit::Done(Tid::INVALID),
            Target::Any => match self.ready.front().copied().or_else(|| self.first_blocked()) {
                Some(victim) => victim,
                None => return Exit::Done(Tid::NONE),
            },
            Target::Thread(i) => i,
        };

        match self.threads.get(victim).map(|t| (t.state, t.blocked_on)) {
            Some((ThreadState::Ready, _)) => self.remove_ready(victim),
            Some((ThreadState::Blocked, slot)) => {
                if let Some(slot) = slot {
                    self.queues.remove(slot, victim);
                }
            }
            _ => return Exit::Done(Tid::INVALID),
        }

        debug!("thread {me} destroyed thread {victim}");
        self.reclaim(victim);
        Exit::Done(Tid::from(victim))
    }

    /// Turn the running thread into a zombie and pick its successor. With
    /// nothing ready, control goes back to the host.
    fn retire(&mut self, me: usize) -> Switch {
        self.set_state(me, ThreadState::Zombie);
        self.zombies.push(me);
        debug!("thread {me} exited");

        let from = self.context_of(me);
        match self.ready.pop_front() {
            Some(next) => self.switch_in(from, next),
            None => {
                self.running = None;
                trace!("no runnable thread left, returning to host");
                Switch {
                    from,
                    to: &*self.host,
                }
            }
        }
    }

    /// Give up on every thread after a panic and return to the host.
    /// Only the first fault is kept.
    pub(crate) fn abandon(&mut self, fault: Fault) -> Switch {
        let from = match self.running.take() {
            Some(me) => {
                self.set_state(me, ThreadState::Zombie);
                self.zombies.push(me);
                error!("thread {me} panicked, abandoning the run");
                self.context_of(me)
            }
            None => &*self.host as *const Context,
        };
        self.fault.get_or_insert(fault);
        Switch {
            from,
            to: &*self.host,
        }
    }

    // -----------------------------------------------------------------------
    // Wait queues
    // -----------------------------------------------------------------------

    pub(crate) fn queue_create(&mut self) -> usize {
        self.queues.create()
    }

    /// Free a queue. Handles from an earlier run are ignored.
    pub(crate) fn queue_destroy(&mut self, slot: usize, epoch: u64) -> Result<(), usize> {
        if epoch != self.epoch {
            return Ok(());
        }
        self.queues.destroy(slot)
    }

    pub(crate) fn queue_len(&self, slot: usize, epoch: u64) -> usize {
        if epoch != self.epoch {
            return 0;
        }
        self.queues.len(slot)
    }

    /// Move one or all threads blocked on `slot` to the ready queue, in
    /// FIFO order. Returns how many moved.
    pub(crate) fn wake(&mut self, slot: usize, epoch: u64, all: bool) -> usize {
        if epoch != self.epoch {
            return 0;
        }
        let mut woken = 0;
        while let Some(index) = self.queues.pop(slot) {
            self.make_ready(index);
            woken += 1;
            if !all {
                break;
            }
        }
        woken
    }

    /// Wake the first thread blocked on `slot` and return its index.
    pub(crate) fn wake_one(&mut self, slot: usize, epoch: u64) -> Option<usize> {
        if epoch != self.epoch {
            return None;
        }
        let index = self.queues.pop(slot)?;
        self.make_ready(index);
        Some(index)
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    pub(crate) fn take_graveyard(&mut self) -> Vec<ThreadControlBlock> {
        mem::take(&mut self.graveyard)
    }

    /// Consume the scheduler on the host stack after the run ended.
    ///
    /// Every remaining TCB is dropped here: zombies, threads left blocked
    /// by a deadlock, and everything abandoned by a panic. None of them is
    /// executing, so their stacks are safe to free.
    pub(crate) fn shut_down(mut self) -> (SchedulerStats, Option<Fault>) {
        debug_assert!(self.running.is_none(), "shut_down while a thread runs");
        let stranded = self
            .threads
            .iter()
            .filter(|t| t.state == ThreadState::Blocked)
            .count();
        if stranded > 0 && self.fault.is_none() {
            warn!("run ended with {stranded} thread(s) still blocked");
        }
        debug!("{} wait queue(s) still live at shutdown", self.queues.live());

        let remaining = self.threads.drain();
        self.stats.threads_reclaimed += remaining.len() as u64;
        let stats = self.stats;
        let fault = self.fault.take();
        drop(remaining);
        (stats, fault)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn resolve(&self, target: Tid) -> Target {
        match target {
            Tid::SELF => Target::Caller,
            Tid::ANY => Target::Any,
            t => match t.index() {
                Some(i) if Some(i) == self.running => Target::Caller,
                Some(i) if self.threads.get(i).is_some() => Target::Thread(i),
                _ => Target::Invalid,
            },
        }
    }

    /// Reclaim every zombie that is not the running thread.
    fn reap(&mut self) {
        if self.zombies.is_empty() {
            return;
        }
        for zombie in mem::take(&mut self.zombies) {
            if Some(zombie) == self.running {
                self.zombies.push(zombie);
            } else {
                self.reclaim(zombie);
            }
        }
    }

    fn reclaim(&mut self, index: usize) {
        if let Some(tcb) = self.threads.remove(index) {
            trace!("reclaimed thread {index}");
            self.stats.threads_reclaimed += 1;
            self.graveyard.push(tcb);
        }
    }

    /// Mark `next` running and describe the switch from `from` to it.
    fn switch_in(&mut self, from: *const Context, next: usize) -> Switch {
        self.running = Some(next);
        self.stats.context_switches += 1;
        let tcb = self
            .threads
            .get_mut(next)
            .unwrap_or_else(|| panic!("scheduled thread {next} has no TCB"));
        tcb.state = ThreadState::Running;
        trace!("switching to thread {next}");
        Switch {
            from,
            to: &tcb.context,
        }
    }

    fn context_of(&self, index: usize) -> *const Context {
        match self.threads.get(index) {
            Some(tcb) => &tcb.context,
            None => &*self.host,
        }
    }

    fn set_state(&mut self, index: usize, state: ThreadState) {
        if let Some(tcb) = self.threads.get_mut(index) {
            tcb.state = state;
        }
    }

    fn make_ready(&mut self, index: usize) {
        if let Some(tcb) = self.threads.get_mut(index) {
            tcb.state = ThreadState::Ready;
            tcb.blocked_on = None;
            self.ready.push_back(index);
        }
    }

    fn remove_ready(&mut self, index: usize) {
        if let Some(pos) = self.ready.iter().position(|&t| t == index) {
            self.ready.remove(pos);
        }
    }

    fn first_blocked(&self) -> Option<usize> {
        self.threads
            .iter()
            .find(|t| t.state == ThreadState::Blocked)
            .map(|t| t.id)
    }

    /// Panic if the outgoing thread has run off the end of its stack.
    fn check_stack(&self, index: usize) {
        if let Some(tcb) = self.threads.get(index) {
            if !tcb.stack.intact() {
                error!("thread {index} overflowed its stack");
                panic!(
                    "thread {index} overflowed its {}-byte stack",
                    tcb.stack.size()
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_THREADS, MIN_STACK_SIZE};

    extern "C" fn never_started(_: *mut u8) -> ! {
        std::process::abort()
    }

    fn scheduler() -> Scheduler {
        let config = RuntimeConfig {
            stack_size: MIN_STACK_SIZE,
        };
        Scheduler::new(&config, never_started, 1)
    }

    /// Scheduler with `n` threads created and thread 0 running.
    fn running(n: usize) -> Scheduler {
        let mut s = scheduler();
        for _ in 0..n {
            assert!(s.create(Box::new(|| {})).is_ok());
        }
        assert!(s.enter().is_some());
        s
    }

    fn stay(t: Transition) -> Tid {
        match t {
            Transition::Stay(tid) => tid,
            Transition::Switch(..) => panic!("unexpected switch"),
        }
    }

    fn switched(t: Transition) -> Tid {
        match t {
            Transition::Switch(tid, _) => tid,
            Transition::Stay(tid) => panic!("expected a switch, got {tid}"),
        }
    }

    fn done(e: Exit) -> Tid {
        match e {
            Exit::Done(tid) => tid,
            Exit::Current(_) => panic!("unexpected self exit"),
        }
    }

    #[test]
    fn test_create_enqueues_in_order() {
        let mut s = scheduler();
        for expected in 0..3 {
            assert_eq!(s.create(Box::new(|| {})), Tid::new(expected));
        }
        assert_eq!(s.ready_len(), 3);
        assert!(s.enter().is_some());
        assert_eq!(s.running(), Some(0));
        assert_eq!(s.state(Tid::new(0)), ThreadState::Running);
        assert_eq!(s.state(Tid::new(1)), ThreadState::Ready);
        assert_eq!(s.stats().threads_created, 3);
    }

    #[test]
    fn test_yield_without_switch() {
        let mut s = running(1);
        assert_eq!(stay(s.plan_yield(Tid::SELF, Cause::Voluntary)), Tid::new(0));
        assert_eq!(stay(s.plan_yield(Tid::new(0), Cause::Voluntary)), Tid::new(0));
        assert_eq!(stay(s.plan_yield(Tid::ANY, Cause::Voluntary)), Tid::NONE);
        assert_eq!(stay(s.plan_yield(Tid::new(0xFFFF_FFFF), Cause::Voluntary)), Tid::INVALID);
        assert_eq!(stay(s.plan_yield(Tid::new(0xDEAD_BEEF), Cause::Voluntary)), Tid::INVALID);
        assert_eq!(stay(s.plan_yield(Tid::new(16), Cause::Voluntary)), Tid::INVALID);
        assert_eq!(s.stats().voluntary_yields, 0);
    }

    #[test]
    fn test_yield_to_specific_thread() {
        let mut s = running(3);
        assert_eq!(switched(s.plan_yield(Tid::new(2), Cause::Voluntary)), Tid::new(2));
        assert_eq!(s.running(), Some(2));
        assert_eq!(s.state(Tid::new(0)), ThreadState::Ready);
        assert_eq!(s.state(Tid::new(2)), ThreadState::Running);

        // Ready queue is now [1, 0]; ANY picks the longest waiter.
        assert_eq!(switched(s.plan_yield(Tid::ANY, Cause::Voluntary)), Tid::new(1));
        assert_eq!(switched(s.plan_yield(Tid::ANY, Cause::Preempted)), Tid::new(0));
        assert_eq!(s.stats().voluntary_yields, 2);
        assert_eq!(s.stats().preemptions, 1);
    }

    #[test]
    fn test_single_running_thread() {
        let mut s = running(4);
        for target in [Tid::new(3), Tid::ANY, Tid::new(1), Tid::ANY, Tid::ANY] {
            s.plan_yield(target, Cause::Voluntary);
            let running = (0..4)
                .filter(|&i| s.state(Tid::new(i)) == ThreadState::Running)
                .count();
            assert_eq!(running, 1);
        }
    }

    #[test]
    fn test_capacity_and_reuse() {
        let mut s = running(1);
        for _ in 0..MAX_THREADS - 1 {
            assert!(s.create(Box::new(|| {})).is_ok());
        }
        assert_eq!(s.create(Box::new(|| {})), Tid::NOMORE);

        // Destroy one; its slot becomes available again.
        assert_eq!(done(s.plan_exit(Tid::new(7))), Tid::new(7));
        assert_eq!(s.create(Box::new(|| {})), Tid::new(7));
        assert_eq!(s.create(Box::new(|| {})), Tid::NOMORE);
    }

    #[test]
    fn test_exit_self_becomes_zombie_then_reclaimed() {
        let mut s = running(2);
        assert!(matches!(s.plan_exit(Tid::SELF), Exit::Current(_)));
        assert_eq!(s.state(Tid::new(0)), ThreadState::Zombie);
        assert_eq!(s.running(), Some(1));

        s.after_switch();
        assert_eq!(s.state(Tid::new(0)), ThreadState::Free);
        assert_eq!(s.take_graveyard().len(), 1);
        assert_eq!(s.stats().threads_reclaimed, 1);

        // The slot is reused by the next creation.
        assert_eq!(s.create(Box::new(|| {})), Tid::new(0));
    }

    #[test]
    fn test_exit_last_thread_returns_to_host() {
        let mut s = running(1);
        assert!(matches!(s.plan_exit(Tid::SELF), Exit::Current(_)));
        assert_eq!(s.running(), None);
        let (stats, fault) = s.shut_down();
        assert!(fault.is_none());
        assert_eq!(stats.threads_reclaimed, 1);
    }

    #[test]
    fn test_exit_other_threads() {
        let mut s = running(3);
        assert_eq!(done(s.plan_exit(Tid::new(2))), Tid::new(2));
        assert_eq!(s.state(Tid::new(2)), ThreadState::Free);
        assert_eq!(done(s.plan_exit(Tid::new(2))), Tid::INVALID);
        assert_eq!(done(s.plan_exit(Tid::new(42))), Tid::INVALID);
        assert_eq!(done(s.plan_exit(Tid::new(-42))), Tid::INVALID);

        assert_eq!(done(s.plan_exit(Tid::ANY)), Tid::new(1));
        assert_eq!(done(s.plan_exit(Tid::ANY)), Tid::NONE);
        assert_eq!(s.ready_len(), 0);
        assert_eq!(s.take_graveyard().len(), 2);
    }

    #[test]
    fn test_sleep_alone_returns_none() {
        let mut s = running(1);
        let q = s.queue_create();
        assert_eq!(stay(s.plan_sleep(q, s.epoch())), Tid::NONE);
        assert_eq!(s.queue_len(q, s.epoch()), 0);
        assert_eq!(s.state(Tid::new(0)), ThreadState::Running);
    }

    #[test]
    fn test_sleep_on_stale_queue_is_invalid() {
        let mut s = running(2);
        let q = s.queue_create();
        assert_eq!(stay(s.plan_sleep(q, s.epoch() + 1)), Tid::INVALID);
        assert_eq!(stay(s.plan_sleep(q + 1, s.epoch())), Tid::INVALID);
        assert_eq!(s.queue_destroy(q, s.epoch() + 1), Ok(()));
    }

    #[test]
    fn test_sleep_and_wake() {
        let mut s = running(4);
        let q = s.queue_create();
        let epoch = s.epoch();

        // Threads 0, 1 and 2 block in turn; 3 ends up running.
        assert_eq!(switched(s.plan_sleep(q, epoch)), Tid::new(1));
        assert_eq!(switched(s.plan_sleep(q, epoch)), Tid::new(2));
        assert_eq!(switched(s.plan_sleep(q, epoch)), Tid::new(3));
        assert_eq!(s.queue_len(q, epoch), 3);
        assert_eq!(s.state(Tid::new(0)), ThreadState::Blocked);
        assert_eq!(s.ready_len(), 0);

        assert_eq!(s.wake(q, epoch, false), 1);
        assert_eq!(s.state(Tid::new(0)), ThreadState::Ready);
        assert_eq!(s.queue_len(q, epoch), 2);

        assert_eq!(s.wake(q, epoch, true), 2);
        assert_eq!(s.queue_len(q, epoch), 0);
        assert_eq!(s.wake(q, epoch, true), 0);

        // FIFO order survives the trip through the wait queue.
        assert_eq!(switched(s.plan_yield(Tid::ANY, Cause::Voluntary)), Tid::new(0));
        assert_eq!(switched(s.plan_yield(Tid::ANY, Cause::Voluntary)), Tid::new(1));
        assert_eq!(s.queue_destroy(q, epoch), Ok(()));
    }

    #[test]
    fn test_destroy_blocked_thread() {
        let mut s = running(3);
        let q = s.queue_create();
        let epoch = s.epoch();

        assert_eq!(switched(s.plan_sleep(q, epoch)), Tid::new(1));
        assert_eq!(s.queue_len(q, epoch), 1);
        assert_eq!(s.queue_destroy(q, epoch), Err(1));

        assert_eq!(done(s.plan_exit(Tid::new(0))), Tid::new(0));
        assert_eq!(s.queue_len(q, epoch), 0);
        assert_eq!(s.state(Tid::new(0)), ThreadState::Free);
        assert_eq!(s.queue_destroy(q, epoch), Ok(()));
    }

    #[test]
    fn test_exit_any_falls_back_to_blocked() {
        let mut s = running(2);
        let q = s.queue_create();
        let epoch = s.epoch();

        assert_eq!(switched(s.plan_sleep(q, epoch)), Tid::new(1));
        assert_eq!(s.ready_len(), 0);
        assert_eq!(done(s.plan_exit(Tid::ANY)), Tid::new(0));
        assert_eq!(s.queue_len(q, epoch), 0);
        assert_eq!(done(s.plan_exit(Tid::ANY)), Tid::NONE);
    }

    #[test]
    fn test_wake_one_returns_index() {
        let mut s = running(3);
        let q = s.queue_create();
        let epoch = s.epoch();
        assert_eq!(switched(s.plan_sleep(q, epoch)), Tid::new(1));
        assert_eq!(s.wake_one(q, epoch), Some(0));
        assert_eq!(s.wake_one(q, epoch), None);
    }

    #[test]
    fn test_reused_slot_is_a_new_incarnation() {
        let mut s = running(2);
        let first = s.incarnation(1).expect("thread 1 exists");
        assert!(s.is_alive(first));

        assert_eq!(done(s.plan_exit(Tid::new(1))), Tid::new(1));
        assert!(!s.is_alive(first));
        assert_eq!(s.incarnation(1), None);

        assert_eq!(s.create(Box::new(|| {})), Tid::new(1));
        let second = s.incarnation(1).expect("thread 1 exists again");
        assert_eq!(second.tid, first.tid);
        assert_ne!(second, first);
        assert!(!s.is_alive(first));
        assert!(s.is_alive(second));
    }

    #[test]
    fn test_abandon_keeps_first_fault() {
        let mut s = running(2);
        let _ = s.abandon(Box::new("first"));
        assert_eq!(s.running(), None);
        let _ = s.abandon(Box::new("second"));

        let (_, fault) = s.shut_down();
        let fault = fault.expect("fault recorded");
        assert_eq!(fault.downcast_ref::<&str>(), Some(&"first"));
    }
}
