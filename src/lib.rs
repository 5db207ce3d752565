//! # GreenRT: Green Thread Runtime
//!
//! User-level threads for Linux: many logical threads multiplexed onto the
//! one OS thread that calls [`run`], with explicit context switching under
//! a FIFO round-robin scheduler and optional timer-driven preemption.
//!
//! ## Overview
//!
//! - **Threads** are closures with their own heap-allocated stack,
//!   identified by a small integer [`Tid`]. They yield, sleep on wait
//!   queues and exit explicitly or by returning.
//! - **Blocking never blocks the OS thread**: a sleeping thread is parked
//!   on a [`WaitQueue`] and another green thread runs in its place.
//! - **Locks and condition variables** are built purely on wait queues.
//! - **Preemption** turns periodic `SIGALRM` ticks into `yield(ANY)`.
//!   Scheduler bookkeeping runs inside critical sections that mask ticks;
//!   a tick arriving while masked is deferred, never lost.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 Green threads (closures)                │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   run() · thread_create() · thread_yield() · exit()     │
//! │   thread_sleep() · thread_wakeup() · stats()            │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Sync Layer       │  Preemption       │
//! │  scheduler.rs│   lock.rs          │  preempt.rs       │
//! │  ─ plan_*()  │   condvar.rs       │  sync.rs          │
//! │  ─ reap()    │   wait_queue.rs    │  ─ mask / defer   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │              Thread Model (thread.rs, stack.rs)         │
//! │        Tid · TCB · ThreadState · ThreadTable · Stack    │
//! ├────────────────────────────────────────────────────────┤
//! │        Arch Port (arch/x86_64.rs, arch/aarch64.rs)      │
//! │          context switch · entry trampoline              │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use greenrt::{run, thread_create, thread_yield, uprintln, Tid};
//!
//! run(|| {
//!     for i in 0..3 {
//!         thread_create(move || uprintln!("worker {i}"));
//!     }
//!     while thread_yield(Tid::ANY) != Tid::NONE {}
//! });
//! ```
//!
//! ## Memory Model
//!
//! - **Fixed-size TCB table**: `MAX_THREADS` slots, allocated once per run
//! - **Per-thread stack**: one heap allocation, with an overflow canary
//! - **Reclamation**: a thread that exits itself is a zombie until the
//!   next context passes through the scheduler
//! - **Critical sections**: `critical_section::with()` over a mask flag

pub mod config;
pub mod error;
pub mod stack;
pub mod thread;
pub mod scheduler;
pub mod arch;
pub mod kernel;
pub mod sync;
pub mod preempt;
pub mod wait_queue;
pub mod lock;
pub mod condvar;
pub mod console;

pub use arch::spin;
pub use condvar::CondVar;
pub use config::{RuntimeConfig, MAX_THREADS};
pub use error::{Error, Result};
pub use kernel::{
    run, run_with, stats, thread_create, thread_exit, thread_id, thread_sleep, thread_state,
    thread_wakeup, thread_yield,
};
pub use lock::Lock;
pub use preempt::PreemptConfig;
pub use scheduler::SchedulerStats;
pub use thread::{ThreadState, Tid};
pub use wait_queue::WaitQueue;
