//! Ownable recursive mutex usable as a waitable object.

use parking_lot::{Condvar, Mutex as PlMutex};
use std::thread::{self, ThreadId};

use super::{SyncError, SyncResult, Timeout, Waitable};

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Mutex owned by a thread rather than by a guard.
///
/// The owning thread may acquire it again without blocking; it becomes free
/// once released as many times as it was acquired.
#[derive(Debug)]
pub struct Mutex {
    state: PlMutex<Ownership>,
    cond: Condvar,
}

impl Mutex {
    pub fn new(initially_owned: bool) -> Self {
        let state = if initially_owned {
            Ownership {
                owner: Some(thread::current().id()),
                depth: 1,
            }
        } else {
            Ownership::default()
        };
        Self {
            state: PlMutex::new(state),
            cond: Condvar::new(),
        }
    }

    /// Acquire ownership, blocking up to `timeout`.
    pub fn wait(&self, timeout: Timeout) -> bool {
        let me = thread::current().id();
        let deadline = timeout.deadline();
        let mut st = self.state.lock();
        loop {
            match st.owner {
                None => {
                    st.owner = Some(me);
                    st.depth = 1;
                    return true;
                }
                Some(owner) if owner == me => {
                    st.depth += 1;
                    return true;
                }
                Some(_) => {}
            }
            match deadline {
                None => self.cond.wait(&mut st),
                Some(d) => {
                    if self.cond.wait_until(&mut st, d).timed_out() && st.owner.is_some() {
                        return false;
                    }
                }
            }
        }
    }

    /// Give up one level of ownership.
    pub fn release(&self) -> SyncResult<()> {
        let me = thread::current().id();
        let mut st = self.state.lock();
        if st.owner != Some(me) {
            return Err(SyncError::NotOwner);
        }
        st.depth -= 1;
        if st.depth == 0 {
            st.owner = None;
            self.cond.notify_one();
        }
        Ok(())
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Waitable for Mutex {
    fn wait(&self, timeout: Timeout) -> bool {
        Mutex::wait(self, timeout)
    }

    fn signal(&self) -> SyncResult<()> {
        self.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_recursive_acquire_and_release() {
        let m = Mutex::new(false);
        assert!(m.wait(Timeout::ZERO));
        assert!(m.wait(Timeout::ZERO));
        m.release().unwrap();
        assert!(m.is_owned_by_current_thread());
        m.release().unwrap();
        assert!(!m.is_locked());
    }

    #[test]
    fn test_release_by_non_owner_fails() {
        let m = Arc::new(Mutex::new(true));
        let other = Arc::clone(&m);
        let result = thread::spawn(move || other.release()).join().unwrap();
        assert_eq!(result, Err(SyncError::NotOwner));

        let unowned = Mutex::new(false);
        assert_eq!(unowned.release(), Err(SyncError::NotOwner));
    }

    #[test]
    fn test_contended_wait_times_out_then_succeeds() {
        let m = Arc::new(Mutex::new(true));
        let other = Arc::clone(&m);
        let timed_out = thread::spawn(move || other.wait(Timeout::from(Duration::from_millis(20))))
            .join()
            .unwrap();
        assert!(!timed_out);

        let other = Arc::clone(&m);
        let waiter = thread::spawn(move || {
            let got = other.wait(Timeout::from(Duration::from_secs(5)));
            if got {
                other.release().unwrap();
            }
            got
        });
        thread::sleep(Duration::from_millis(20));
        m.release().unwrap();
        assert!(waiter.join().unwrap());
    }
}
