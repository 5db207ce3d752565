//! # Kernel
//!
//! Runtime lifetime and public thread API for GreenRT.
//!
//! The kernel owns the single process-wide scheduler instance, binds it to
//! the OS thread that calls [`run`], and performs the context switches the
//! scheduler plans. All public functions use critical sections to stay
//! atomic with respect to preemption ticks.
//!
//! ## Run Sequence
//!
//! ```text
//! run(main)
//!   ├─► take RUN_GATE, bump epoch, bind to this OS thread
//!   ├─► Scheduler::new + create(main)     ← thread 0
//!   ├─► switch host ──► thread 0
//!   │        ... green threads create, yield, sleep, exit ...
//!   ├─◄ last thread exits (or one panics): switch back to host
//!   ├─► disarm preemption, shut the scheduler down
//!   └─► return SchedulerStats, or re-raise the thread's panic
//! ```
//!
//! ## Switch Protocol
//!
//! Every switch is performed inside a critical section with the scheduler
//! borrow released. The resumed context is, by construction, also inside a
//! critical section (the one it switched out of), and it finishes the
//! transition with [`Scheduler::after_switch`] before returning to its
//! caller. A freshly created thread starts in [`thread_start`] instead and
//! unmasks explicitly.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU64, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex as StdMutex, PoisonError};

use critical_section::Mutex;
use log::info;

use crate::config::RuntimeConfig;
use crate::preempt;
use crate::scheduler::{Cause, Exit, Fault, Scheduler, SchedulerStats, Transition};
use crate::sync::{self, CriticalSection};
use crate::thread::{self, Incarnation, ThreadState, Tid};
use crate::wait_queue::WaitQueue;

// ---------------------------------------------------------------------------
// Global runtime instance
// ---------------------------------------------------------------------------

/// Global scheduler instance; `None` outside [`run`].
///
/// Only reachable from the owner OS thread, inside a critical section.
static SCHEDULER: Mutex<RefCell<Option<Scheduler>>> = Mutex::new(RefCell::new(None));

/// Serializes runs started from different OS threads.
static RUN_GATE: StdMutex<()> = StdMutex::new(());

/// Identifies the current run. Wait queues remember it.
static EPOCH: AtomicU64 = AtomicU64::new(0);

/// `pthread_t` of the OS thread inside [`run`], or 0.
static OWNER: AtomicU64 = AtomicU64::new(0);

#[inline]
fn current_os_thread() -> u64 {
    // SAFETY: pthread_self has no preconditions and is async-signal-safe.
    unsafe { libc::pthread_self() as u64 }
}

/// The OS thread that owns the active run, if any.
pub(crate) fn owner() -> Option<libc::pthread_t> {
    match OWNER.load(Ordering::SeqCst) {
        0 => None,
        owner => Some(owner as libc::pthread_t),
    }
}

#[inline]
fn on_owner_thread() -> bool {
    OWNER.load(Ordering::SeqCst) == current_os_thread()
}

/// Run `f` against the scheduler, then drop whatever it reclaimed once the
/// borrow is released. `None` outside an active run on this OS thread.
fn try_with_scheduler<R>(cs: CriticalSection<'_>, f: impl FnOnce(&mut Scheduler) -> R) -> Option<R> {
    if !on_owner_thread() {
        return None;
    }
    let (result, graveyard) = {
        let mut slot = SCHEDULER.borrow_ref_mut(cs);
        let scheduler = slot.as_mut()?;
        let result = f(scheduler);
        (result, scheduler.take_graveyard())
    };
    // Entry closures of threads that never ran may own wait queues or
    // locks whose Drop calls back into the kernel.
    drop(graveyard);
    Some(result)
}

fn with_scheduler<R>(cs: CriticalSection<'_>, f: impl FnOnce(&mut Scheduler) -> R) -> R {
    try_with_scheduler(cs, f)
        .unwrap_or_else(|| panic!("greenrt: thread API used outside greenrt::run"))
}

/// Whether a run is active on the calling OS thread.
pub(crate) fn is_active() -> bool {
    sync::critical_section(|cs| try_with_scheduler(cs, |_| ()).is_some())
}

// ---------------------------------------------------------------------------
// Runtime lifetime
// ---------------------------------------------------------------------------

/// Run `main` as thread 0 with the default configuration and return once
/// every green thread has finished.
///
/// See [`run_with`].
pub fn run<F>(main: F) -> SchedulerStats
where
    F: FnOnce() + 'static,
{
    run_with(RuntimeConfig::default(), main)
}

/// Start the runtime on the calling OS thread with `main` as thread 0.
///
/// Returns when no green thread is left to run. Threads still blocked at
/// that point (a deadlock) are reclaimed with a warning. If a green thread
/// panics, the remaining threads are abandoned and the panic is re-raised
/// here.
///
/// Runs from different OS threads are serialized.
///
/// # Panics
/// If called from inside a green thread, or if a green thread panicked.
pub fn run_with<F>(config: RuntimeConfig, main: F) -> SchedulerStats
where
    F: FnOnce() + 'static,
{
    let me = current_os_thread();
    assert!(
        OWNER.load(Ordering::SeqCst) != me,
        "greenrt::run called from inside a green thread"
    );
    let gate = RUN_GATE.lock().unwrap_or_else(PoisonError::into_inner);

    let epoch = EPOCH.fetch_add(1, Ordering::SeqCst) + 1;
    preempt::reset_counters();
    sync::clear_pending();
    OWNER.store(me, Ordering::SeqCst);
    info!(
        "runtime starting (run {epoch}, {} byte stacks)",
        config.effective_stack_size()
    );

    let scheduler = sync::critical_section(|cs| {
        let enter = {
            let mut slot = SCHEDULER.borrow_ref_mut(cs);
            let scheduler = slot.insert(Scheduler::new(&config, thread_start, epoch));
            scheduler.create(thread::entry(main));
            scheduler.enter()
        };
        if let Some(switch) = enter {
            // SAFETY: on the host stack, masked, with the borrow released.
            unsafe { switch.perform() };
        }

        // Back on the host: every thread has exited, or one panicked.
        preempt::disable();
        sync::clear_pending();
        SCHEDULER.borrow_ref_mut(cs).take()
    });

    let (mut stats, fault) = scheduler.map(Scheduler::shut_down).unwrap_or_default();
    stats.deferred_ticks = preempt::deferred_ticks();
    OWNER.store(0, Ordering::SeqCst);
    info!(
        "runtime stopped (run {epoch}): {} switches, {} preemptions, {} threads",
        stats.context_switches, stats.preemptions, stats.threads_created
    );

    if let Some(fault) = fault {
        drop(gate);
        panic::resume_unwind(fault);
    }
    stats
}

/// First code executed by every green thread.
extern "C" fn thread_start(_: *mut u8) -> ! {
    // SAFETY: every switch happens with ticks masked, so a fresh thread
    // starts inside the critical section of the context that switched to it.
    let cs = unsafe { CriticalSection::new() };
    let entry = with_scheduler(cs, |s| {
        s.after_switch();
        s.take_entry()
    });
    sync::restore(false);

    if let Some(mut entry) = entry {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry()));
        // The runtime frees memory only with ticks masked.
        sync::critical_section(|_| drop(entry));
        if let Err(fault) = outcome {
            abandon(fault);
        }
    }
    exit_current()
}

fn exit_current() -> ! {
    let result = thread_exit(Tid::SELF);
    unreachable!("thread_exit(SELF) returned {result}")
}

/// Leave the run after a panic; the host re-raises `fault`.
fn abandon(fault: Fault) -> ! {
    sync::critical_section(|cs| {
        let switch = with_scheduler(cs, |s| s.abandon(fault));
        // SAFETY: masked, borrow released, on the panicking thread's stack.
        unsafe { switch.perform() };
    });
    unreachable!("an abandoned thread was resumed")
}

/// Perform a planned transition and return the caller's result once it
/// runs again.
fn transition(plan: impl FnOnce(&mut Scheduler) -> Transition) -> Tid {
    sync::critical_section(|cs| match with_scheduler(cs, plan) {
        Transition::Stay(tid) => tid,
        Transition::Switch(tid, switch) => {
            // SAFETY: masked, borrow released, on the caller's own stack.
            unsafe { switch.perform() };
            with_scheduler(cs, Scheduler::after_switch);
            tid
        }
    })
}

// ---------------------------------------------------------------------------
// Thread API
// ---------------------------------------------------------------------------

/// Create a thread that runs `entry` and append it to the ready queue.
///
/// Returns the new thread's identity, or `Tid::NOMORE` when all
/// [`MAX_THREADS`](crate::config::MAX_THREADS) slots are in use. The
/// caller keeps running.
///
/// ```ignore
/// let tid = thread_create(|| uprintln!("hello from {}", thread_id()));
/// assert!(tid.is_ok());
/// ```
pub fn thread_create<F>(entry: F) -> Tid
where
    F: FnOnce() + 'static,
{
    sync::critical_section(|cs| with_scheduler(cs, |s| s.create(thread::entry(entry))))
}

/// Give up the CPU to `target`.
///
/// - `Tid::SELF` or the caller's own id: no switch, returns the caller.
/// - `Tid::ANY`: switch to the head of the ready queue; `Tid::NONE` if the
///   queue is empty.
/// - a ready thread: switch to it.
/// - anything else: `Tid::INVALID`.
///
/// On a switch, returns the target's id once the caller runs again.
pub fn thread_yield(target: Tid) -> Tid {
    transition(|s| s.plan_yield(target, Cause::Voluntary))
}

/// Destroy `target`.
///
/// `Tid::SELF` (or the caller's own id) never returns. A ready or blocked
/// thread is reclaimed immediately and its id returned. `Tid::ANY`
/// destroys the head of the ready queue, else the lowest-numbered blocked
/// thread, else returns `Tid::NONE`. Anything else is `Tid::INVALID`.
pub fn thread_exit(target: Tid) -> Tid {
    sync::critical_section(|cs| match with_scheduler(cs, |s| s.plan_exit(target)) {
        Exit::Done(tid) => tid,
        Exit::Current(switch) => {
            // SAFETY: the zombie's stack stays allocated until another
            // context has switched away from it.
            unsafe { switch.perform() };
            unreachable!("a zombie thread was resumed")
        }
    })
}

/// Identity of the calling thread.
pub fn thread_id() -> Tid {
    sync::critical_section(|cs| with_scheduler(cs, |s| s.running().map_or(Tid::NONE, Tid::from)))
}

/// Current state of `tid`. `Tid::SELF` reports the caller; every other
/// sentinel and every unused slot reports `Free`.
pub fn thread_state(tid: Tid) -> ThreadState {
    sync::critical_section(|cs| {
        with_scheduler(cs, |s| match tid {
            Tid::SELF => s.running().map_or(ThreadState::Free, |_| ThreadState::Running),
            tid => s.state(tid),
        })
    })
}

/// Block the caller on `queue` until another thread wakes it.
///
/// Returns `Tid::INVALID` for `None` (or a queue from an earlier run) and
/// `Tid::NONE` without blocking when no other thread is ready. Otherwise
/// returns the id of the thread that ran in the caller's place, once the
/// caller is woken and scheduled again.
pub fn thread_sleep(queue: Option<&WaitQueue>) -> Tid {
    let Some(queue) = queue else {
        return Tid::INVALID;
    };
    transition(|s| s.plan_sleep(queue.slot(), queue.epoch()))
}

/// Make one (`all == false`) or every thread blocked on `queue` ready, in
/// FIFO order. Returns how many were woken; `0` for `None`.
pub fn thread_wakeup(queue: Option<&WaitQueue>, all: bool) -> usize {
    let Some(queue) = queue else {
        return 0;
    };
    sync::critical_section(|cs| with_scheduler(cs, |s| s.wake(queue.slot(), queue.epoch(), all)))
}

/// Statistics of the current run so far.
pub fn stats() -> SchedulerStats {
    let mut stats = sync::critical_section(|cs| with_scheduler(cs, |s| s.stats()));
    stats.deferred_ticks = preempt::deferred_ticks();
    stats
}

// ---------------------------------------------------------------------------
// Crate-internal hooks
// ---------------------------------------------------------------------------

/// Wake the first thread on `queue` and return it.
pub(crate) fn wake_one(queue: &WaitQueue) -> Option<Incarnation> {
    sync::critical_section(|cs| {
        with_scheduler(cs, |s| {
            s.wake_one(queue.slot(), queue.epoch())
                .and_then(|i| s.incarnation(i))
        })
    })
}

/// The calling thread.
pub(crate) fn current() -> Incarnation {
    sync::critical_section(|cs| {
        with_scheduler(cs, |s| s.running().and_then(|i| s.incarnation(i)))
    })
    .unwrap_or_else(|| panic!("greenrt: thread API used outside a green thread"))
}

/// Whether `who` has neither finished nor been destroyed. `false` outside
/// an active run.
pub(crate) fn is_alive(who: Incarnation) -> bool {
    sync::critical_section(|cs| try_with_scheduler(cs, |s| s.is_alive(who))).unwrap_or(false)
}

/// Involuntary `yield(ANY)` on behalf of the running thread. Called from
/// the tick handler, or when a latched tick is serviced.
pub(crate) fn preempt_tick() {
    if !preempt::is_enabled() {
        return;
    }
    sync::critical_section(|cs| {
        let plan = try_with_scheduler(cs, |s| s.plan_yield(Tid::ANY, Cause::Preempted));
        if let Some(Transition::Switch(_, switch)) = plan {
            // SAFETY: masked, borrow released, on the interrupted stack.
            unsafe { switch.perform() };
            with_scheduler(cs, Scheduler::after_switch);
        }
    });
}

pub(crate) fn queue_create() -> (usize, u64) {
    sync::critical_section(|cs| with_scheduler(cs, |s| (s.queue_create(), s.epoch())))
}

pub(crate) fn queue_len(slot: usize, epoch: u64) -> usize {
    sync::critical_section(|cs| try_with_scheduler(cs, |s| s.queue_len(slot, epoch))).unwrap_or(0)
}

/// Queues dropped after their run ended (or during teardown) are ignored.
pub(crate) fn queue_destroy(slot: usize, epoch: u64) -> Result<(), usize> {
    sync::critical_section(|cs| try_with_scheduler(cs, |s| s.queue_destroy(slot, epoch)))
        .unwrap_or(Ok(()))
}
