//! Wait queues: sleep, wakeup, and destroying blocked threads.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use greenrt::{
    run, spin, thread_create, thread_exit, thread_sleep, thread_state, thread_wakeup,
    thread_yield, ThreadState, Tid, WaitQueue,
};

fn drain() {
    while thread_yield(Tid::ANY) != Tid::NONE {}
}

#[test]
fn test_sleep_alone_returns_none() {
    run(|| {
        let queue = WaitQueue::new();
        assert!(queue.is_empty());
        assert_eq!(thread_sleep(Some(&queue)), Tid::NONE);
        assert_eq!(thread_sleep(None), Tid::INVALID);
        assert_eq!(thread_wakeup(None, true), 0);
        assert_eq!(thread_wakeup(Some(&queue), true), 0);
    });
}

#[test]
fn test_wakeup_one_then_all() {
    const SLEEPERS: usize = 5;
    let woken = Rc::new(Cell::new(0));
    let w = woken.clone();
    run(move || {
        let queue = Rc::new(WaitQueue::new());
        for _ in 0..SLEEPERS {
            let (q, w) = (queue.clone(), w.clone());
            thread_create(move || {
                assert!(thread_sleep(Some(&q)).is_ok());
                w.set(w.get() + 1);
            });
        }

        // Every sleeper runs once and blocks.
        assert!(thread_yield(Tid::ANY).is_ok());
        assert_eq!(queue.len(), SLEEPERS);
        assert_eq!(thread_state(Tid::new(1)), ThreadState::Blocked);

        assert_eq!(thread_wakeup(Some(&queue), false), 1);
        assert_eq!(queue.len(), SLEEPERS - 1);
        assert_eq!(thread_state(Tid::new(1)), ThreadState::Ready);
        assert!(thread_yield(Tid::ANY).is_ok());
        assert_eq!(w.get(), 1);

        assert_eq!(thread_wakeup(Some(&queue), true), SLEEPERS - 1);
        assert!(queue.is_empty());
        drain();
        assert_eq!(w.get(), SLEEPERS);
    });
    assert_eq!(woken.get(), SLEEPERS);
}

#[test]
fn test_sleepers_wake_in_fifo_order() {
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));
    let o = order.clone();
    run(move || {
        let queue = Rc::new(WaitQueue::new());
        for _ in 0..4 {
            let (q, o) = (queue.clone(), o.clone());
            thread_create(move || {
                thread_sleep(Some(&q));
                o.borrow_mut().push(greenrt::thread_id().raw());
            });
        }
        thread_yield(Tid::ANY);
        assert_eq!(thread_wakeup(Some(&queue), true), 4);
        drain();
    });
    assert_eq!(*order.borrow(), vec![1, 2, 3, 4]);
}

#[test]
fn test_sleep_lasts_until_woken() {
    let slept = Rc::new(Cell::new(Duration::ZERO));
    let s = slept.clone();
    run(move || {
        let queue = Rc::new(WaitQueue::new());
        let q = queue.clone();
        thread_create(move || {
            let start = Instant::now();
            thread_sleep(Some(&q));
            s.set(start.elapsed());
        });
        thread_yield(Tid::ANY);

        spin(5_000);
        assert_eq!(thread_wakeup(Some(&queue), false), 1);
        drain();
    });
    assert!(slept.get() >= Duration::from_millis(5));
}

#[test]
fn test_exit_blocked_thread() {
    let resumed = Rc::new(Cell::new(false));
    let r = resumed.clone();
    run(move || {
        let queue = Rc::new(WaitQueue::new());
        let q = queue.clone();
        let sleeper = thread_create(move || {
            thread_sleep(Some(&q));
            r.set(true);
        });
        thread_yield(Tid::ANY);
        assert_eq!(queue.len(), 1);

        assert_eq!(thread_exit(sleeper), sleeper);
        assert!(queue.is_empty());
        assert_eq!(thread_state(sleeper), ThreadState::Free);
        assert_eq!(thread_wakeup(Some(&queue), true), 0);
    });
    assert!(!resumed.get());
}

#[test]
fn test_exit_any_takes_blocked_thread_last() {
    run(|| {
        let queue = Rc::new(WaitQueue::new());
        let q = queue.clone();
        let sleeper = thread_create(move || {
            thread_sleep(Some(&q));
        });
        thread_yield(Tid::ANY);
        let ready = thread_create(|| {});

        assert_eq!(thread_exit(Tid::ANY), ready);
        assert_eq!(thread_exit(Tid::ANY), sleeper);
        assert_eq!(thread_exit(Tid::ANY), Tid::NONE);
        assert!(queue.is_empty());
    });
}

#[test]
fn test_deadlocked_threads_are_reclaimed() {
    let stats = run(|| {
        let queue = Rc::new(WaitQueue::new());
        for _ in 0..3 {
            let q = queue.clone();
            thread_create(move || {
                thread_sleep(Some(&q));
            });
        }
        // Main exits. Threads 1 and 2 block forever; thread 3 finds
        // nothing else ready, so its sleep returns NONE and it exits.
    });
    assert_eq!(stats.threads_created, 4);
    assert_eq!(stats.threads_reclaimed, 4);
}

#[test]
#[should_panic(expected = "destroyed with 1 blocked thread")]
fn test_drop_queue_with_sleeper_panics() {
    run(|| {
        let queue = WaitQueue::new();
        let addr = &queue as *const WaitQueue as usize;
        thread_create(move || {
            // SAFETY: main keeps the queue alive until after this thread
            // has blocked, and this thread is never resumed.
            let q = unsafe { &*(addr as *const WaitQueue) };
            thread_sleep(Some(q));
        });
        thread_yield(Tid::ANY);
        drop(queue);
    });
}
