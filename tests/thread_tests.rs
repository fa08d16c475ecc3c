//! Integration tests for managed worker threads.

mod common;

use common::fast_runtime;
use pretty_assertions::assert_eq;
use serial_test::serial;
use serial_transport::runtime::{self, ThreadHooks};
use serial_transport::sync::{AtomicCounter, Event, Timeout};
use serial_transport::thread::{
    with_rng, ManagedThread, TerminateFlag, ThreadError, ThreadPriority, Wakeup, PANIC_EXIT_CODE,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
#[serial]
fn test_cooperative_stop() {
    let _rt = fast_runtime();
    let worker = ManagedThread::new("poller");
    let ticks = Arc::new(AtomicCounter::new(0));
    let t = Arc::clone(&ticks);

    worker
        .launch(ThreadPriority::Normal, move |ctx| {
            while !ctx.park(Timeout::from_millis(5)) {
                t.incr();
            }
            7
        })
        .unwrap();
    thread::sleep(Duration::from_millis(30));

    assert!(worker.terminate_and_wait());
    assert!(!worker.is_running());
    assert_eq!(worker.exit_code(), Some(7));
    assert!(ticks.get() > 0);
}

#[test]
#[serial]
fn test_unresponsive_worker_is_abandoned() {
    let _rt = fast_runtime();
    let worker = ManagedThread::new("stubborn");
    let release = Arc::new(Event::manual());
    let r = Arc::clone(&release);

    worker
        .launch(ThreadPriority::Normal, move |_ctx| {
            r.wait(Timeout::from_millis(5000));
            0
        })
        .unwrap();

    let started = Instant::now();
    let exited = worker.terminate_and_wait();

    assert!(!exited);
    assert!(!worker.is_running());
    assert!(started.elapsed() >= runtime::current().term_timeout);
    release.set();
}

#[test]
#[serial]
fn test_relaunch_after_exit() {
    let _rt = fast_runtime();
    let worker = ManagedThread::new("twice");

    worker.launch(ThreadPriority::Normal, |_| 1).unwrap();
    assert!(worker.wait_for_term());
    assert_eq!(worker.exit_code(), Some(1));

    worker.launch(ThreadPriority::Normal, |_| 2).unwrap();
    assert!(worker.wait_for_term());
    assert_eq!(worker.exit_code(), Some(2));
}

#[test]
#[serial]
fn test_launch_while_running_is_rejected() {
    let _rt = fast_runtime();
    let worker = ManagedThread::new("busy");
    worker
        .launch(ThreadPriority::Normal, |ctx| {
            ctx.park(Timeout::Infinite);
            0
        })
        .unwrap();

    let second = worker.launch(ThreadPriority::Normal, |_| 0);

    assert!(matches!(second, Err(ThreadError::AlreadyRunning { .. })));
    assert!(worker.terminate_and_wait());
}

#[test]
#[serial]
fn test_panicking_worker_reports_exit_code() {
    let _rt = fast_runtime();
    let worker = ManagedThread::new("fragile");

    worker
        .launch(ThreadPriority::Normal, |_| panic!("worker failed"))
        .unwrap();

    assert!(worker.wait_for_term());
    assert_eq!(worker.exit_code(), Some(PANIC_EXIT_CODE));
}

#[test]
#[serial]
fn test_shared_terminate_flag_stops_group() {
    let _rt = fast_runtime();
    let flag = TerminateFlag::new();
    let workers: Vec<_> = (0..3)
        .map(|i| {
            let w = ManagedThread::new(format!("group-{i}"));
            w.set_terminate_flag(flag.clone());
            w.launch(ThreadPriority::Normal, |ctx| {
                while !ctx.should_stop() {
                    thread::sleep(Duration::from_millis(2));
                }
                0
            })
            .unwrap();
            w
        })
        .collect();

    flag.set();

    for w in &workers {
        assert!(w.wait_for_term());
        assert!(w.terminate_flag().ptr_eq(&flag));
    }
}

#[test]
#[serial]
fn test_park_on_distinguishes_event_from_stop() {
    let _rt = fast_runtime();
    let worker = ManagedThread::new("parker");
    let event = Arc::new(Event::auto());
    let seen = Arc::new(AtomicCounter::new(0));
    let (e, s) = (Arc::clone(&event), Arc::clone(&seen));

    worker
        .launch(ThreadPriority::Normal, move |ctx| loop {
            match ctx.park_on(&e, Timeout::Infinite) {
                Wakeup::Signaled => {
                    s.incr();
                }
                Wakeup::Terminated => return 0,
                Wakeup::TimedOut => return 1,
            }
        })
        .unwrap();

    event.set();
    let delivered = common::wait_until(Duration::from_secs(1), || seen.get() == 1);
    assert!(delivered);

    assert!(worker.terminate_and_wait());
    assert_eq!(worker.exit_code(), Some(0));
}

#[test]
#[serial]
fn test_apartment_hooks_run_around_worker() {
    let _rt = fast_runtime();
    let calls = Arc::new(AtomicCounter::new(0));
    let (on_start, on_stop) = (Arc::clone(&calls), Arc::clone(&calls));
    runtime::set_thread_hooks(ThreadHooks::new(
        move |_| {
            on_start.incr();
        },
        move |_| {
            on_stop.incr();
        },
    ));

    let plain = ManagedThread::new("plain");
    plain.launch(ThreadPriority::Normal, |_| 0).unwrap();
    assert!(plain.wait_for_term());
    assert_eq!(calls.get(), 0);

    let apartment = ManagedThread::new("apartment").with_apartment(true);
    apartment.launch(ThreadPriority::Normal, |_| 0).unwrap();
    assert!(apartment.wait_for_term());
    assert_eq!(calls.get(), 2);

    runtime::clear_thread_hooks();
}

#[test]
#[serial]
fn test_seeded_rng_is_reproducible() {
    let _rt = fast_runtime();
    let draw = |seed: u32| {
        let worker = ManagedThread::new("dice").with_seed(seed);
        let out = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let o = Arc::clone(&out);
        worker
            .launch(ThreadPriority::Normal, move |_| {
                use rand::Rng;
                *o.lock() = with_rng(|rng| (0..4).map(|_| rng.gen::<u32>()).collect());
                0
            })
            .unwrap();
        assert!(worker.wait_for_term());
        let values = out.lock().clone();
        values
    };

    assert_eq!(draw(42), draw(42));
    assert_ne!(draw(42), draw(43));
}
