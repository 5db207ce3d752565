//! Timer-driven preemption.
//!
//! Threads in these tests run unmasked with ticks armed, so their bodies
//! stay clear of allocation and of `std::print!`.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use greenrt::config::MIN_STACK_SIZE;
use greenrt::{
    preempt, run, run_with, spin, stats, sync, thread_create, thread_yield, uprintln, CondVar,
    Lock, PreemptConfig, RuntimeConfig, Tid,
};

fn fast_ticks() -> PreemptConfig {
    PreemptConfig {
        interval: Duration::from_micros(100),
        loud: false,
    }
}

fn drain() {
    while thread_yield(Tid::ANY) != Tid::NONE {}
}

#[test]
fn test_hot_potato_needs_preemption() {
    const PASSES: usize = 20;
    let result = run(|| {
        let potato = Rc::new(AtomicUsize::new(0));

        for me in 0..2usize {
            let potato = potato.clone();
            thread_create(move || {
                // Neither thread ever yields; only ticks move the potato.
                while potato.load(Ordering::SeqCst) < PASSES {
                    let held = potato.load(Ordering::SeqCst);
                    if held % 2 == me {
                        potato.store(held + 1, Ordering::SeqCst);
                    }
                    spin(20);
                }
            });
        }
        preempt::enable(fast_ticks()).unwrap();
        drain();
        assert!(potato.load(Ordering::SeqCst) >= PASSES);
        preempt::disable();
    });
    assert!(result.preemptions > 0);
}

#[test]
fn test_ticks_inside_critical_sections_are_deferred() {
    run(|| {
        preempt::enable(fast_ticks()).unwrap();
        sync::critical_section(|_| spin(5_000));
        assert!(preempt::ticks() > 0);
        assert!(stats().deferred_ticks > 0);
        preempt::disable();
    });
}

#[test]
fn test_mask_and_restore_defer_ticks() {
    let result = run(|| {
        let other_ran = Rc::new(AtomicBool::new(false));
        let o = other_ran.clone();
        thread_create(move || o.store(true, Ordering::SeqCst));

        let previous = sync::mask();
        assert!(!previous);
        preempt::enable(fast_ticks()).unwrap();
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(5) {
            assert!(!other_ran.load(Ordering::SeqCst));
        }
        sync::restore(previous);

        // The latched tick switched to the other thread on restore, or a
        // later tick will.
        while !other_ran.load(Ordering::SeqCst) {
            spin(10);
        }
        preempt::disable();
    });
    assert!(result.deferred_ticks > 0);
    assert!(result.preemptions > 0);
}

#[test]
fn test_lock_counter_under_preemption() {
    const THREADS: usize = 6;
    const ROUNDS: usize = 200;
    let total = Rc::new(AtomicUsize::new(0));
    let t = total.clone();
    run(move || {
        let lock = Rc::new(Lock::new());
        let counter = Rc::new(AtomicUsize::new(0));
        for _ in 0..THREADS {
            let (lock, counter) = (lock.clone(), counter.clone());
            thread_create(move || {
                for _ in 0..ROUNDS {
                    lock.acquire();
                    let seen = counter.load(Ordering::SeqCst);
                    spin(5);
                    counter.store(seen + 1, Ordering::SeqCst);
                    lock.release();
                }
            });
        }
        preempt::enable(fast_ticks()).unwrap();
        drain();
        preempt::disable();
        t.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
    });
    assert_eq!(total.load(Ordering::SeqCst), THREADS * ROUNDS);
}

#[test]
fn test_condvar_turns_under_preemption() {
    const N: usize = 5;
    let result = run(|| {
        let lock = Rc::new(Lock::new());
        let cv = Rc::new(CondVar::new());
        let turn = Rc::new(AtomicI64::new(N as i64 - 1));
        // order[k] is the worker that took the k-th turn.
        let order: Rc<[AtomicUsize; N]> = Rc::new(Default::default());
        let taken = Rc::new(AtomicUsize::new(0));

        for me in 0..N {
            let (lock, cv, turn) = (lock.clone(), cv.clone(), turn.clone());
            let (order, taken) = (order.clone(), taken.clone());
            thread_create(move || {
                lock.acquire();
                while turn.load(Ordering::SeqCst) != me as i64 {
                    cv.wait(&lock);
                    spin(20);
                }
                let k = taken.load(Ordering::SeqCst);
                spin(50);
                order[k].store(me, Ordering::SeqCst);
                taken.store(k + 1, Ordering::SeqCst);
                turn.store(me as i64 - 1, Ordering::SeqCst);
                cv.broadcast(&lock);
                lock.release();
            });
        }
        preempt::enable(fast_ticks()).unwrap();
        drain();
        preempt::disable();

        assert_eq!(taken.load(Ordering::SeqCst), N);
        let seen: Vec<usize> = order.iter().map(|o| o.load(Ordering::SeqCst)).collect();
        assert_eq!(seen, vec![4, 3, 2, 1, 0]);
    });
    assert_eq!(result.threads_created, N as u64 + 1);
}

#[test]
fn test_short_lived_threads_under_preemption() {
    const THREADS: usize = 300;
    let config = RuntimeConfig {
        stack_size: MIN_STACK_SIZE,
    };
    let result = run_with(config, || {
        let finished = Rc::new(AtomicUsize::new(0));
        preempt::enable(fast_ticks()).unwrap();

        // Stacks and entry closures are allocated and freed continuously
        // while ticks land.
        let mut created = 0;
        while created < THREADS {
            let f = finished.clone();
            let tid = thread_create(move || {
                spin(10);
                f.fetch_add(1, Ordering::SeqCst);
            });
            if tid.is_ok() {
                created += 1;
            } else {
                thread_yield(Tid::ANY);
            }
            spin(5);
        }
        drain();
        preempt::disable();
        assert_eq!(finished.load(Ordering::SeqCst), THREADS);
    });
    assert_eq!(result.threads_created, THREADS as u64 + 1);
    assert_eq!(result.threads_reclaimed, THREADS as u64 + 1);
}

#[test]
fn test_uprintln_under_preemption() {
    let result = run(|| {
        for _ in 0..3 {
            thread_create(|| {
                for i in 0..5 {
                    uprintln!("green thread line {i}");
                    spin(100);
                }
            });
        }
        preempt::enable(PreemptConfig {
            interval: Duration::from_micros(50),
            loud: true,
        })
        .unwrap();
        spin(500);
        preempt::set_loud(false);
        drain();
        preempt::disable();
    });
    assert_eq!(result.threads_created, 4);
}

#[test]
fn test_run_disarms_preemption() {
    run(|| {
        preempt::enable(PreemptConfig::default()).unwrap();
        assert!(preempt::is_enabled());
    });
    // Runs are serialized, and each one disarms the timer on its way out.
    run(|| assert!(!preempt::is_enabled()));
}

#[test]
fn test_interval_too_short_is_rejected() {
    run(|| {
        let config = PreemptConfig {
            interval: Duration::from_micros(1),
            loud: false,
        };
        assert!(matches!(
            preempt::enable(config),
            Err(greenrt::Error::Interval(_))
        ));
        assert!(!preempt::is_enabled());
    });
}
