//! Cross-thread wait/signal primitives.
//!
//! Every waitable object in this module follows the same contract: `wait`
//! blocks until the object is signaled or the [`Timeout`] elapses and returns
//! `true` only when it was signaled. [`Timeout::Infinite`] is a first-class
//! value, not a sentinel.
//!
//! - [`Event`]: manual- or auto-reset event
//! - [`Mutex`]: ownable, recursively acquirable by its owning thread
//! - [`Semaphore`]: bounded counting semaphore
//! - [`CriticalSection`]: re-entrant lock with no timeout and no multi-wait support
//! - [`MultiWait`]: wait for the first (or all) of up to [`MAX_WAIT_OBJECTS`] events
//! - [`AtomicCounter`]: interlocked increment/decrement

mod critical_section;
mod error;
mod event;
mod multi_wait;
mod mutex;
mod semaphore;
mod timeout;

pub use critical_section::{CriticalSection, CriticalSectionGuard};
pub use error::{SyncError, SyncResult};
pub use event::{Event, EventReset};
pub use multi_wait::{MultiWait, MultiWaitResult, MAX_WAIT_OBJECTS};
pub use mutex::Mutex;
pub use semaphore::Semaphore;
pub use timeout::Timeout;

use std::sync::atomic::{AtomicI32, Ordering};

/// Common contract of every handle-style synchronization object.
///
/// [`CriticalSection`] intentionally does not implement this trait.
pub trait Waitable: Send + Sync {
    /// Block until signaled or until `timeout` elapses.
    fn wait(&self, timeout: Timeout) -> bool;

    /// Signal (event), release one count (semaphore) or relinquish ownership (mutex).
    fn signal(&self) -> SyncResult<()>;

    /// Like [`Waitable::signal`], reporting failure as `false`.
    fn try_signal(&self) -> bool {
        self.signal().is_ok()
    }
}

/// Owned synchronization object of any waitable kind.
#[derive(Debug)]
pub enum SyncObject {
    Event(Event),
    Mutex(Mutex),
    Semaphore(Semaphore),
}

impl Waitable for SyncObject {
    fn wait(&self, timeout: Timeout) -> bool {
        match self {
            Self::Event(e) => e.wait(timeout),
            Self::Mutex(m) => m.wait(timeout),
            Self::Semaphore(s) => s.wait(timeout),
        }
    }

    fn signal(&self) -> SyncResult<()> {
        match self {
            Self::Event(e) => e.signal(),
            Self::Mutex(m) => m.signal(),
            Self::Semaphore(s) => s.signal(),
        }
    }
}

impl From<Event> for SyncObject {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

impl From<Mutex> for SyncObject {
    fn from(mutex: Mutex) -> Self {
        Self::Mutex(mutex)
    }
}

impl From<Semaphore> for SyncObject {
    fn from(semaphore: Semaphore) -> Self {
        Self::Semaphore(semaphore)
    }
}

/// Interlocked counter; `incr`/`decr` return the updated value.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicI32,
}

impl AtomicCounter {
    pub const fn new(initial: i32) -> Self {
        Self {
            value: AtomicI32::new(initial),
        }
    }

    pub fn incr(&self) -> i32 {
        self.value.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn decr(&self) -> i32 {
        self.value.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1)
    }

    pub fn get(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_counter_returns_updated_value() {
        let counter = AtomicCounter::new(0);
        assert_eq!(counter.incr(), 1);
        assert_eq!(counter.incr(), 2);
        assert_eq!(counter.decr(), 1);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn test_counter_across_threads() {
        let counter = Arc::new(AtomicCounter::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.incr();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.get(), 4000);
    }

    #[test]
    fn test_sync_object_dispatch() {
        let objects: Vec<SyncObject> = vec![
            Event::new(false, EventReset::Manual).into(),
            Mutex::new(false).into(),
            Semaphore::new(0, 2).unwrap().into(),
        ];

        // Event and semaphore start unsignaled; a free mutex is immediately acquirable.
        assert!(!objects[0].wait(Timeout::ZERO));
        assert!(objects[1].wait(Timeout::ZERO));
        assert!(!objects[2].wait(Timeout::ZERO));

        for obj in &objects {
            assert!(obj.try_signal());
        }

        assert!(objects[0].wait(Timeout::from(Duration::from_millis(10))));
        assert!(objects[2].wait(Timeout::ZERO));
    }
}
