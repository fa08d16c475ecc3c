//! Integration tests for the synchronization primitives.
//!
//! These exercise the primitives across threads, the way the transport and
//! managed threads use them.

use pretty_assertions::assert_eq;
use serial_transport::sync::{
    AtomicCounter, CriticalSection, Event, EventReset, MultiWait, MultiWaitResult, Mutex,
    Semaphore, SyncError, SyncObject, Timeout, Waitable, MAX_WAIT_OBJECTS,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_auto_event_releases_exactly_one_waiter() {
    // Arrange
    let event = Arc::new(Event::auto());
    let woken = Arc::new(AtomicCounter::new(0));
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let event = Arc::clone(&event);
            let woken = Arc::clone(&woken);
            thread::spawn(move || {
                if event.wait(Timeout::from_millis(300)) {
                    woken.incr();
                }
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(50));

    // Act
    event.set();
    for w in waiters {
        w.join().unwrap();
    }

    // Assert
    assert_eq!(woken.get(), 1);
    assert!(!event.is_signaled());
}

#[test]
fn test_manual_event_releases_all_waiters() {
    let event = Arc::new(Event::new(false, EventReset::Manual));
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait(Timeout::from_millis(1000)))
        })
        .collect();
    thread::sleep(Duration::from_millis(30));

    event.set();

    assert!(waiters.into_iter().all(|w| w.join().unwrap()));
    assert!(event.is_signaled());
}

#[test]
fn test_multi_wait_reports_lowest_signaled_index() {
    let events: Vec<Event> = (0..4).map(|_| Event::auto()).collect();
    events[1].set();
    events[3].set();
    let refs: Vec<&Event> = events.iter().collect();
    let mut wait = MultiWait::new(&refs).unwrap();

    let result = wait.lock(Timeout::ZERO, false, None);
    wait.commit();

    assert_eq!(result, MultiWaitResult::Signaled(1));
    assert!(!events[1].is_signaled());
    assert!(events[3].is_signaled());
}

#[test]
fn test_multi_wait_limits() {
    let events: Vec<Event> = (0..=MAX_WAIT_OBJECTS).map(|_| Event::manual()).collect();
    let refs: Vec<&Event> = events.iter().collect();

    assert!(matches!(
        MultiWait::new(&refs).err(),
        Some(SyncError::TooManyObjects { .. })
    ));
    assert_eq!(MultiWait::new(&[]).err(), Some(SyncError::Empty));
    assert!(MultiWait::new(&refs[..MAX_WAIT_OBJECTS]).is_ok());
}

#[test]
fn test_multi_wait_for_all_across_threads() {
    let a = Arc::new(Event::auto());
    let b = Arc::new(Event::auto());
    let setter = {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        thread::spawn(move || {
            a.set();
            thread::sleep(Duration::from_millis(30));
            b.set();
        })
    };

    let mut wait = MultiWait::new(&[&*a, &*b]).unwrap();
    let result = wait.lock(Timeout::from_millis(2000), true, None);
    wait.commit();
    setter.join().unwrap();

    assert_eq!(result, MultiWaitResult::AllSignaled);
    assert!(!a.is_signaled());
    assert!(!b.is_signaled());
}

#[test]
fn test_multi_wait_wake_source() {
    let watched = Event::auto();
    let input = Arc::new(Event::auto());
    let poker = {
        let input = Arc::clone(&input);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            input.set();
        })
    };

    let mut wait = MultiWait::new(&[&watched]).unwrap();
    let result = wait.lock(Timeout::from_millis(2000), false, Some(&input));
    poker.join().unwrap();

    assert_eq!(result, MultiWaitResult::Woken);
}

#[test]
fn test_multi_wait_times_out() {
    let event = Event::auto();
    let mut wait = MultiWait::new(&[&event]).unwrap();

    let started = Instant::now();
    let result = wait.lock(Timeout::from_millis(40), false, None);

    assert_eq!(result, MultiWaitResult::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(35));
}

#[test]
fn test_recursive_mutex_ownership() {
    let mutex = Arc::new(Mutex::new(false));
    assert!(mutex.wait(Timeout::ZERO));
    assert!(mutex.wait(Timeout::ZERO));

    let other = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || (mutex.wait(Timeout::from_millis(20)), mutex.release()))
    };
    let (acquired, released) = other.join().unwrap();
    assert!(!acquired);
    assert_eq!(released, Err(SyncError::NotOwner));

    mutex.release().unwrap();
    assert!(mutex.is_locked());
    mutex.release().unwrap();
    assert!(!mutex.is_locked());
}

#[test]
fn test_semaphore_counts_and_overflow() {
    let sem = Semaphore::new(0, 2).unwrap();

    assert_eq!(sem.release(2), Ok(0));
    assert!(matches!(
        sem.release(1),
        Err(SyncError::SemaphoreOverflow { .. })
    ));
    assert!(sem.wait(Timeout::ZERO));
    assert!(sem.wait(Timeout::ZERO));
    assert!(!sem.wait(Timeout::ZERO));
    assert!(Semaphore::new(3, 2).is_err());
}

#[test]
fn test_sync_objects_share_one_contract() {
    let objects = vec![
        SyncObject::from(Event::auto()),
        SyncObject::from(Semaphore::new(0, 1).unwrap()),
    ];
    for obj in &objects {
        assert!(!obj.wait(Timeout::ZERO));
        assert!(obj.try_signal());
        assert!(obj.wait(Timeout::ZERO));
    }
}

#[test]
fn test_critical_section_excludes_other_threads() {
    let section = Arc::new(CriticalSection::new());
    let counter = Arc::new(AtomicCounter::new(0));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let section = Arc::clone(&section);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..100 {
                    let _guard = section.lock();
                    let _nested = section.lock();
                    let before = counter.get();
                    counter.incr();
                    assert_eq!(counter.get(), before + 1);
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(counter.get(), 400);
}
