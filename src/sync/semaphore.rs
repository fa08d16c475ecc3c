//! Bounded counting semaphore.

use parking_lot::{Condvar, Mutex};

use super::{SyncError, SyncResult, Timeout, Waitable};

#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<u32>,
    cond: Condvar,
    max: u32,
}

impl Semaphore {
    /// Create a semaphore holding `initial` of at most `max` counts.
    pub fn new(initial: u32, max: u32) -> SyncResult<Self> {
        if max == 0 {
            return Err(SyncError::invalid_argument("semaphore maximum must be positive"));
        }
        if initial > max {
            return Err(SyncError::invalid_argument(format!(
                "initial count {initial} exceeds maximum {max}"
            )));
        }
        Ok(Self {
            count: Mutex::new(initial),
            cond: Condvar::new(),
            max,
        })
    }

    /// Take one count, blocking up to `timeout`.
    pub fn wait(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut count = self.count.lock();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            match deadline {
                None => self.cond.wait(&mut count),
                Some(d) => {
                    if self.cond.wait_until(&mut count, d).timed_out() && *count == 0 {
                        return false;
                    }
                }
            }
        }
    }

    /// Return `n` counts and report the count held before the release.
    pub fn release(&self, n: u32) -> SyncResult<u32> {
        if n == 0 {
            return Err(SyncError::invalid_argument("release count must be positive"));
        }
        let mut count = self.count.lock();
        let previous = *count;
        match previous.checked_add(n) {
            Some(next) if next <= self.max => {
                *count = next;
                self.cond.notify_all();
                Ok(previous)
            }
            _ => Err(SyncError::SemaphoreOverflow {
                count: previous,
                release: n,
                max: self.max,
            }),
        }
    }

    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

impl Waitable for Semaphore {
    fn wait(&self, timeout: Timeout) -> bool {
        Semaphore::wait(self, timeout)
    }

    fn signal(&self) -> SyncResult<()> {
        self.release(1).map(|_| ())
    }
}
