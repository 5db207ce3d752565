//! # GreenRT Configuration
//!
//! Compile-time constants governing the runtime, plus the small runtime
//! configuration struct accepted by [`crate::kernel::run_with`].
//! The thread table itself is fixed at compile time.

use core::time::Duration;

/// Maximum number of threads the runtime can manage simultaneously,
/// including the initial thread (identity 0). Bounds the TCB table.
pub const MAX_THREADS: usize = 1024;

/// Default per-thread stack size in bytes.
///
/// Stacks are allocated lazily by the host allocator, so untouched pages
/// cost address space only. Signal frames delivered on a green stack need
/// a few KiB on top of the thread's own call chain.
pub const STACK_SIZE: usize = 256 * 1024;

/// Smallest stack the runtime will hand out. Smaller requests are
/// rounded up.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Default preemption tick period.
pub const TICK_INTERVAL: Duration = Duration::from_micros(200);

/// Shortest tick period accepted by [`crate::preempt::enable`]. Below this
/// the handler and the switch it performs would consume the whole slice.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_micros(10);

/// Runtime parameters fixed for the lifetime of one [`crate::kernel::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Stack size for every thread created during the run, in bytes.
    /// `0` means [`STACK_SIZE`].
    pub stack_size: usize,
}

impl RuntimeConfig {
    /// Returns the effective stack size: the default when unset, never
    /// below [`MIN_STACK_SIZE`].
    #[inline]
    pub const fn effective_stack_size(&self) -> usize {
        if self.stack_size == 0 {
            STACK_SIZE
        } else if self.stack_size < MIN_STACK_SIZE {
            MIN_STACK_SIZE
        } else {
            self.stack_size
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { stack_size: STACK_SIZE }
    }
}
