//! Manual- and auto-reset events.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::{SyncResult, Timeout, Waitable};

/// Reset behaviour of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReset {
    /// Stays signaled until [`Event::reset`]; every waiter is released.
    Manual,
    /// Releases exactly one waiter and returns to unsignaled.
    Auto,
}

/// One-shot wake-up shared between a multi-object waiter and the events it watches.
#[derive(Debug, Default)]
pub(crate) struct Notifier {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Notifier {
    pub(crate) fn notify(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cond.notify_all();
    }

    pub(crate) fn clear(&self) {
        *self.fired.lock() = false;
    }

    /// Wait for a notification; `false` when the deadline passed first.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut fired = self.fired.lock();
        while !*fired {
            match deadline {
                None => self.cond.wait(&mut fired),
                Some(d) => {
                    if self.cond.wait_until(&mut fired, d).timed_out() {
                        return *fired;
                    }
                }
            }
        }
        true
    }
}

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_listener_id() -> u64 {
    NEXT_LISTENER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
pub(crate) struct EventState {
    pub(crate) signaled: bool,
    listeners: Vec<(u64, Arc<Notifier>)>,
}

/// Signalable event object.
///
/// An auto-reset event releases exactly one waiter per [`Event::set`]; a
/// manual-reset event stays signaled and releases every waiter until reset.
#[derive(Debug)]
pub struct Event {
    state: Mutex<EventState>,
    cond: Condvar,
    reset: EventReset,
}

impl Event {
    pub fn new(initially_signaled: bool, reset: EventReset) -> Self {
        Self {
            state: Mutex::new(EventState {
                signaled: initially_signaled,
                listeners: Vec::new(),
            }),
            cond: Condvar::new(),
            reset,
        }
    }

    /// Unsignaled manual-reset event.
    pub fn manual() -> Self {
        Self::new(false, EventReset::Manual)
    }

    /// Unsignaled auto-reset event.
    pub fn auto() -> Self {
        Self::new(false, EventReset::Auto)
    }

    pub fn reset_mode(&self) -> EventReset {
        self.reset
    }

    /// Signal the event, waking waiters and any registered multi-waits.
    pub fn set(&self) {
        let listeners: Vec<Arc<Notifier>> = {
            let mut st = self.state.lock();
            st.signaled = true;
            st.listeners.iter().map(|(_, n)| Arc::clone(n)).collect()
        };
        self.cond.notify_all();
        for n in listeners {
            n.notify();
        }
    }

    /// Return the event to unsignaled.
    pub fn reset(&self) {
        self.state.lock().signaled = false;
    }

    /// Snapshot of the signaled state; does not consume an auto-reset signal.
    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Wait until signaled; an auto-reset event is consumed by a successful wait.
    pub fn wait(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut st = self.state.lock();
        loop {
            if self.consume_locked(&mut st) {
                return true;
            }
            match deadline {
                None => self.cond.wait(&mut st),
                Some(d) => {
                    if self.cond.wait_until(&mut st, d).timed_out() {
                        return self.consume_locked(&mut st);
                    }
                }
            }
        }
    }

    /// Non-blocking acquire used by multi-object waits.
    pub(crate) fn try_consume(&self) -> bool {
        let mut st = self.state.lock();
        self.consume_locked(&mut st)
    }

    pub(crate) fn consume_locked(&self, st: &mut EventState) -> bool {
        if !st.signaled {
            return false;
        }
        if self.reset == EventReset::Auto {
            st.signaled = false;
        }
        true
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EventState> {
        self.state.lock()
    }

    pub(crate) fn add_listener(&self, id: u64, notifier: Arc<Notifier>) {
        self.state.lock().listeners.push((id, notifier));
    }

    pub(crate) fn remove_listener(&self, id: u64) {
        self.state.lock().listeners.retain(|(lid, _)| *lid != id);
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::manual()
    }
}

impl Waitable for Event {
    fn wait(&self, timeout: Timeout) -> bool {
        Event::wait(self, timeout)
    }

    fn signal(&self) -> SyncResult<()> {
        self.set();
        Ok(())
    }
}
