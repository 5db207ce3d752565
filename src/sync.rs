//! # Synchronization Primitives
//!
//! Tick-safe critical sections for GreenRT.
//!
//! Preemption arrives as a signal on the runtime's OS thread, so
//! "disabling interrupts" means raising a mask flag that the tick handler
//! checks before it switches threads. A tick that finds the flag raised is
//! latched and serviced when the outermost critical section ends:
//!
//! ```text
//!   critical_section ─┬─ acquire: MASKED = true, remember previous
//!                     │     ... tick arrives ──► PENDING = true
//!                     ├─ release: MASKED = previous
//!                     └─ MASKED == false && PENDING ──► yield(ANY)
//! ```
//!
//! The flag is registered as the process's `critical-section`
//! implementation, so the scheduler state lives in a plain
//! `critical_section::Mutex` exactly as it would on a single-core MCU.
//!
//! The flag is per OS thread: it excludes the tick handler, which always
//! runs on the runtime's own OS thread. It does not exclude other OS
//! threads; the kernel refuses to touch its state from any thread but the
//! one inside `run`.

use core::cell::Cell;
use core::sync::atomic::{compiler_fence, Ordering};

pub use critical_section::CriticalSection;

use crate::kernel;

thread_local! {
    static MASKED: Cell<bool> = const { Cell::new(false) };
    static PENDING: Cell<bool> = const { Cell::new(false) };
}

struct TickMask;

critical_section::set_impl!(TickMask);

// SAFETY: every green thread runs on the one OS thread that owns the
// runtime and the tick handler interrupts only that thread, so raising a
// thread-local flag is enough to exclude it.
unsafe impl critical_section::Impl for TickMask {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        let previous = MASKED.replace(true);
        compiler_fence(Ordering::SeqCst);
        previous
    }

    unsafe fn release(previous: critical_section::RawRestoreState) {
        compiler_fence(Ordering::SeqCst);
        MASKED.set(previous);
    }
}

/// Execute a closure with preemption masked.
///
/// This is the primary mechanism for safely accessing shared mutable state
/// in GreenRT. Sections nest; a tick latched while masked is serviced as
/// soon as the outermost section ends.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    let result = critical_section::with(f);
    service_pending();
    result
}

/// Raise the mask and return its previous value, for [`restore`].
///
/// Prefer [`critical_section`]; this pair exists for regions that do not
/// fit a closure. Never restore inside a section that was entered after
/// the matching `mask`.
#[inline]
pub fn mask() -> bool {
    let previous = MASKED.replace(true);
    compiler_fence(Ordering::SeqCst);
    previous
}

/// Put the mask back to `previous` and service a latched tick.
#[inline]
pub fn restore(previous: bool) {
    compiler_fence(Ordering::SeqCst);
    MASKED.set(previous);
    service_pending();
}

#[inline]
pub fn is_masked() -> bool {
    MASKED.get()
}

/// Latch a tick that arrived while masked.
#[inline]
pub(crate) fn defer_tick() {
    PENDING.set(true);
}

pub(crate) fn clear_pending() {
    PENDING.set(false);
}

fn service_pending() {
    compiler_fence(Ordering::SeqCst);
    if !MASKED.get() && PENDING.replace(false) {
        kernel::preempt_tick();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
