//! # Preemption
//!
//! Periodic ticks from `ITIMER_REAL`, delivered as `SIGALRM`, turned into
//! an involuntary `yield(ANY)` on behalf of the interrupted green thread.
//!
//! ## Tick Handling
//!
//! ```text
//! SIGALRM
//!   ├─► not the runtime's OS thread?  ──► forward with pthread_kill
//!   ├─► preemption disabled?          ──► ignore
//!   ├─► masked?                       ──► latch, serviced on unmask
//!   └─► otherwise                     ──► kernel::preempt_tick()
//! ```
//!
//! The handler is installed with `SA_NODEFER`: it may switch to another
//! green thread and only return much later, when the interrupted thread is
//! scheduled again, and `SIGALRM` must stay deliverable in the meantime.
//! `errno` is saved and restored around the handler because the threads it
//! switches to share the OS thread's `errno`.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::io;
use std::mem;
use std::ptr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{MIN_TICK_INTERVAL, TICK_INTERVAL};
use crate::error::{Error, Result};
use crate::kernel;
use crate::sync;

static ENABLED: AtomicBool = AtomicBool::new(false);
static LOUD: AtomicBool = AtomicBool::new(false);
static TICKS: AtomicU64 = AtomicU64::new(0);
static DEFERRED: AtomicU64 = AtomicU64::new(0);
static INSTALLED: Mutex<bool> = Mutex::new(false);

/// Tick configuration for [`enable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreemptConfig {
    /// Tick period. Must be at least [`MIN_TICK_INTERVAL`].
    pub interval: Duration,
    /// Write a line to stderr for every tick.
    pub loud: bool,
}

impl Default for PreemptConfig {
    fn default() -> Self {
        Self {
            interval: TICK_INTERVAL,
            loud: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Install the tick handler (once per process) and arm the timer.
///
/// Code that runs unmasked while preemption is enabled must not allocate
/// or take process-wide locks; see [`crate::sync::critical_section`].
/// [`crate::run`] disarms the timer before it returns.
pub fn enable(config: PreemptConfig) -> Result<()> {
    if config.interval < MIN_TICK_INTERVAL {
        return Err(Error::Interval(config.interval));
    }
    sync::critical_section(|_| {
        install_handler()?;
        LOUD.store(config.loud, Ordering::SeqCst);
        ENABLED.store(true, Ordering::SeqCst);
        if let Err(e) = arm(config.interval) {
            ENABLED.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!("preemption enabled, tick every {:?}", config.interval);
        Ok(())
    })
}

/// Disarm the timer. Ticks already in flight are ignored.
pub fn disable() {
    if !ENABLED.swap(false, Ordering::SeqCst) {
        return;
    }
    if let Err(e) = arm(Duration::ZERO) {
        warn!("failed to disarm preemption timer: {e}");
    }
    debug!("preemption disabled");
}

#[inline]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

/// Switch the per-tick stderr trace on or off.
pub fn set_loud(loud: bool) {
    LOUD.store(loud, Ordering::SeqCst);
}

/// Ticks handled on the runtime thread during the current run.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::SeqCst)
}

pub(crate) fn deferred_ticks() -> u64 {
    DEFERRED.load(Ordering::SeqCst)
}

pub(crate) fn reset_counters() {
    TICKS.store(0, Ordering::SeqCst);
    DEFERRED.store(0, Ordering::SeqCst);
}

// ---------------------------------------------------------------------------
// Signal and timer plumbing
// ---------------------------------------------------------------------------

fn install_handler() -> Result<()> {
    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
    if *installed {
        return Ok(());
    }
    // SAFETY: the sigaction struct is fully initialised before use and the
    // handler has the signature the kernel expects for a non-SA_SIGINFO
    // handler.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_tick as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_NODEFER | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGALRM, &action, ptr::null_mut()) != 0 {
            return Err(Error::Signal(io::Error::last_os_error()));
        }
    }
    *installed = true;
    debug!("SIGALRM handler installed");
    Ok(())
}

/// Program the periodic timer; a zero interval disarms it.
fn arm(interval: Duration) -> Result<()> {
    let period = libc::timeval {
        tv_sec: interval.as_secs() as libc::time_t,
        tv_usec: interval.subsec_micros() as libc::suseconds_t,
    };
    let timer = libc::itimerval {
        it_interval: period,
        it_value: period,
    };
    // SAFETY: `timer` is a valid itimerval; the old value is not requested.
    if unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, ptr::null_mut()) } != 0 {
        return Err(Error::Timer(io::Error::last_os_error()));
    }
    Ok(())
}

extern "C" fn on_tick(_signal: libc::c_int) {
    // SAFETY: errno is thread-local and always addressable.
    let saved = unsafe { *libc::__errno_location() };
    tick();
    // SAFETY: as above.
    unsafe { *libc::__errno_location() = saved };
}

fn tick() {
    let Some(owner) = kernel::owner() else {
        return;
    };
    // SAFETY: pthread_self and pthread_kill are async-signal-safe; the
    // owner stays alive while it is recorded as owner.
    unsafe {
        if libc::pthread_self() != owner {
            libc::pthread_kill(owner, libc::SIGALRM);
            return;
        }
    }
    if !is_enabled() {
        return;
    }

    let n = TICKS.fetch_add(1, Ordering::SeqCst) + 1;
    let masked = sync::is_masked();
    if LOUD.load(Ordering::SeqCst) {
        let mut line = [0u8; TRACE_LEN];
        let len = format_tick(&mut line, n, masked);
        // SAFETY: write(2) is async-signal-safe; `line` holds `len` bytes.
        unsafe { libc::write(libc::STDERR_FILENO, line.as_ptr().cast(), len) };
    }

    if masked {
        DEFERRED.fetch_add(1, Ordering::SeqCst);
        sync::defer_tick();
    } else {
        kernel::preempt_tick();
    }
}

const TRACE_LEN: usize = 48;

/// Format the loud-mode trace line without allocating.
fn format_tick(buf: &mut [u8; TRACE_LEN], n: u64, masked: bool) -> usize {
    const PREFIX: &[u8] = b"greenrt: tick ";
    let suffix: &[u8] = if masked { b" deferred\n" } else { b"\n" };

    let mut digits = [0u8; 20];
    let mut count = 0;
    let mut v = n;
    loop {
        digits[count] = b'0' + (v % 10) as u8;
        count += 1;
        v /= 10;
        if v == 0 {
            break;
        }
    }

    let mut len = PREFIX.len();
    buf[..len].copy_from_slice(PREFIX);
    for &d in digits[..count].iter().rev() {
        buf[len] = d;
        len += 1;
    }
    buf[len..len + suffix.len()].copy_from_slice(suffix);
    len + suffix.len()
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
