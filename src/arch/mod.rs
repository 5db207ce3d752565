//! # Architecture Abstraction Layer
//!
//! The context primitive: the only code in the crate that moves a stack
//! pointer. Each port supplies two assembly routines:
//!
//! - `greenrt_context_switch(save_sp, load_sp)` pushes the callee-saved
//!   registers, stores the stack pointer through `save_sp`, loads
//!   `load_sp`, pops the callee-saved registers found there and returns
//!   into the resumed thread.
//! - `greenrt_context_entry` is the first "return address" of a fresh
//!   context. It moves the prepared argument into the first argument
//!   register and calls the prepared entry function, which never returns.
//!
//! Everything else (which context to switch to, when a stack may be freed)
//! is decided by the scheduler.

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod x86_64;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
use self::x86_64 as port;

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
mod aarch64;
#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
use self::aarch64 as port;

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("greenrt supports Linux on x86_64 and aarch64 only");

use core::cell::Cell;
use core::hint;
use core::ptr;
use std::time::{Duration, Instant};

use crate::stack::Stack;

/// Entry point of a fresh context. Receives the argument given to
/// [`Context::prepare`].
pub type EntryFn = extern "C" fn(*mut u8) -> !;

extern "C" {
    fn greenrt_context_switch(save_sp: *mut *mut u8, load_sp: *mut u8);
    fn greenrt_context_entry();
}

// ---------------------------------------------------------------------------
// Saved context
// ---------------------------------------------------------------------------

/// Saved execution context of a suspended thread.
///
/// All register state lives on the thread's own stack; the context only
/// records where. The pointer sits in a `Cell` because the switch routine
/// writes it through a raw pointer while the scheduler holds shared
/// references to the owning TCB.
#[derive(Debug)]
pub struct Context {
    sp: Cell<*mut u8>,
}

impl Context {
    /// A context that has never been saved. Switching *to* it is undefined;
    /// it is only valid as the `from` side, e.g. for the host stack.
    pub const fn empty() -> Self {
        Self {
            sp: Cell::new(ptr::null_mut()),
        }
    }

    /// Prepare this context so that the first switch to it runs
    /// `entry(arg)` on `stack`.
    ///
    /// # Safety
    /// `stack` must outlive every switch into this context, and must not be
    /// in use by any other context.
    pub unsafe fn prepare(&self, stack: &Stack, entry: EntryFn, arg: *mut u8) {
        let sp = port::initial_frame(stack.top(), entry, arg, greenrt_context_entry as usize);
        self.sp.set(sp);
    }

    /// Whether the context holds a resumable stack pointer.
    #[inline]
    pub fn is_saved(&self) -> bool {
        !self.sp.get().is_null()
    }
}

/// Suspend the calling code into `from` and resume `to`.
///
/// Returns when some later switch resumes `from`.
///
/// # Safety
/// `to` must hold a context saved by a previous switch or prepared by
/// [`Context::prepare`], whose stack is still alive. `from` must stay at a
/// stable address until it is resumed.
#[inline(never)]
pub unsafe fn switch(from: &Context, to: &Context) {
    debug_assert!(to.is_saved(), "switch to a context that was never saved");
    greenrt_context_switch(from.sp.as_ptr(), to.sp.get());
}

// ---------------------------------------------------------------------------
// Busy wait
// ---------------------------------------------------------------------------

/// Busy-wait for `usecs` microseconds without yielding the logical thread.
///
/// Ticks still arrive while spinning; with preemption enabled the thread
/// may be switched out and resumed in the middle of the wait, which is
/// counted against the wall-clock deadline.
pub fn spin(usecs: u64) {
    let deadline = Instant::now() + Duration::from_micros(usecs);
    while Instant::now() < deadline {
        hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
