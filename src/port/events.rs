//! Comm-event bookkeeping shared by a port and its I/O engine.

use parking_lot::Mutex;

use super::types::EventMask;
use crate::sync::{Event, Timeout};

#[derive(Debug)]
struct CommEvents {
    mask: EventMask,
    /// A wait has been initiated and has not completed yet.
    armed: bool,
    /// Events raised while no wait was armed.
    history: EventMask,
    /// Result of the last completed wait, cleared when read.
    last: EventMask,
    event_char: u8,
}

/// Event mask, single-shot result and completion signal of one port.
#[derive(Debug)]
pub(crate) struct CommEventState {
    inner: Mutex<CommEvents>,
    signal: Event,
}

impl CommEventState {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(CommEvents {
                mask: EventMask::empty(),
                armed: false,
                history: EventMask::empty(),
                last: EventMask::empty(),
                event_char: 0,
            }),
            signal: Event::manual(),
        }
    }

    /// State installed by `open`.
    pub(crate) fn reset_for_open(&self) {
        let mut ev = self.inner.lock();
        ev.mask = EventMask::DEFAULT;
        ev.armed = false;
        ev.history = EventMask::empty();
        ev.last = EventMask::empty();
        self.signal.reset();
    }

    pub(crate) fn mask(&self) -> EventMask {
        self.inner.lock().mask
    }

    /// Replace the mask; an armed wait completes with no event.
    pub(crate) fn set_mask(&self, mask: EventMask) {
        let mut ev = self.inner.lock();
        ev.mask = mask;
        ev.history = EventMask::empty();
        if ev.armed {
            ev.armed = false;
            ev.last = EventMask::empty();
            self.signal.set();
        }
    }

    pub(crate) fn event_char(&self) -> u8 {
        self.inner.lock().event_char
    }

    pub(crate) fn set_event_char(&self, ch: u8, adjust_mask: bool) {
        let mut ev = self.inner.lock();
        ev.event_char = ch;
        if adjust_mask {
            ev.mask |= EventMask::RX_FLAG;
        }
    }

    /// Arm a wait unless one is already outstanding.
    pub(crate) fn initiate(&self) {
        let mut ev = self.inner.lock();
        if ev.armed {
            return;
        }
        if !ev.history.is_empty() {
            ev.last = std::mem::take(&mut ev.history);
            self.signal.set();
            return;
        }
        ev.armed = true;
        self.signal.reset();
    }

    /// Report `events`, filtered by the current mask.
    pub(crate) fn raise(&self, events: EventMask) {
        let mut ev = self.inner.lock();
        let events = events & ev.mask;
        if events.is_empty() {
            return;
        }
        if ev.armed {
            ev.armed = false;
            ev.last = events;
            self.signal.set();
        } else {
            ev.history |= events;
        }
    }

    /// Complete any armed wait with no event and wake every waiter.
    pub(crate) fn force(&self) {
        let mut ev = self.inner.lock();
        if ev.armed {
            ev.armed = false;
            ev.last = EventMask::empty();
        }
        self.signal.set();
    }

    pub(crate) fn take_last(&self) -> EventMask {
        std::mem::take(&mut self.inner.lock().last)
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.inner.lock().armed
    }

    pub(crate) fn wait(&self, timeout: Timeout) -> bool {
        self.signal.wait(timeout)
    }
}
