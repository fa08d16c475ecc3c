//! Wait on several events at once.

use std::sync::Arc;

use super::event::{next_listener_id, Notifier};
use super::{Event, SyncError, SyncResult, Timeout};

/// Largest number of events a single [`MultiWait`] may watch.
pub const MAX_WAIT_OBJECTS: usize = 64;

/// Outcome of [`MultiWait::lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiWaitResult {
    /// The event at this index was signaled (lowest index wins ties).
    Signaled(usize),
    /// Every event was signaled and acquired together.
    AllSignaled,
    /// The wake event fired before any watched event.
    Woken,
    Timeout,
}

/// Scoped wait over a fixed list of events.
///
/// Events acquired by [`MultiWait::lock`] are marked as held. Held events are
/// signaled again when the `MultiWait` is dropped unless [`MultiWait::commit`]
/// takes ownership of the consumed signals first.
#[derive(Debug)]
pub struct MultiWait<'a> {
    events: Vec<&'a Event>,
    held: Vec<bool>,
}

impl<'a> MultiWait<'a> {
    pub fn new(events: &[&'a Event]) -> SyncResult<Self> {
        if events.is_empty() {
            return Err(SyncError::Empty);
        }
        if events.len() > MAX_WAIT_OBJECTS {
            return Err(SyncError::TooManyObjects {
                count: events.len(),
                max: MAX_WAIT_OBJECTS,
            });
        }
        for (i, a) in events.iter().enumerate() {
            if events[..i].iter().any(|b| std::ptr::eq(*a, *b)) {
                return Err(SyncError::invalid_argument(format!(
                    "event at index {i} appears more than once"
                )));
            }
        }
        Ok(Self {
            events: events.to_vec(),
            held: vec![false; events.len()],
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Wait for one event (or all, with `wait_for_all`) to be signaled.
    ///
    /// `wake`, when given, ends the wait with [`MultiWaitResult::Woken`] if it
    /// fires while no watched event is available.
    pub fn lock(
        &mut self,
        timeout: Timeout,
        wait_for_all: bool,
        wake: Option<&Event>,
    ) -> MultiWaitResult {
        let deadline = timeout.deadline();
        let notifier = Arc::new(Notifier::default());
        let id = next_listener_id();
        for e in &self.events {
            e.add_listener(id, Arc::clone(&notifier));
        }
        if let Some(w) = wake {
            w.add_listener(id, Arc::clone(&notifier));
        }

        let result = loop {
            notifier.clear();
            if let Some(r) = self.try_acquire(wait_for_all) {
                break r;
            }
            if wake.is_some_and(|w| w.try_consume()) {
                break MultiWaitResult::Woken;
            }
            if !notifier.wait(deadline) {
                break self
                    .try_acquire(wait_for_all)
                    .unwrap_or(MultiWaitResult::Timeout);
            }
        };

        for e in &self.events {
            e.remove_listener(id);
        }
        if let Some(w) = wake {
            w.remove_listener(id);
        }
        result
    }

    /// Whether the event at `index` is currently held by this wait.
    pub fn is_held(&self, index: usize) -> bool {
        self.held.get(index).copied().unwrap_or(false)
    }

    /// Keep the consumed signals; nothing is re-signaled on drop.
    pub fn commit(&mut self) {
        self.held.iter_mut().for_each(|h| *h = false);
    }

    fn try_acquire(&mut self, wait_for_all: bool) -> Option<MultiWaitResult> {
        if wait_for_all {
            return self.try_acquire_all();
        }
        for (i, e) in self.events.iter().enumerate() {
            if e.try_consume() {
                self.held[i] = true;
                return Some(MultiWaitResult::Signaled(i));
            }
        }
        None
    }

    fn try_acquire_all(&mut self) -> Option<MultiWaitResult> {
        // Lock in address order so concurrent all-waits never deadlock.
        let mut order: Vec<usize> = (0..self.events.len()).collect();
        order.sort_by_key(|&i| self.events[i] as *const Event as usize);

        let mut guards: Vec<_> = order
            .iter()
            .map(|&i| (i, self.events[i].lock_state()))
            .collect();
        if !guards.iter().all(|(_, st)| st.signaled) {
            return None;
        }
        for (i, st) in guards.iter_mut() {
            self.events[*i].consume_locked(st);
        }
        drop(guards);
        self.held.iter_mut().for_each(|h| *h = true);
        Some(MultiWaitResult::AllSignaled)
    }
}

impl Drop for MultiWait<'_> {
    fn drop(&mut self) {
        for (e, held) in self.events.iter().zip(&self.held) {
            if *held {
                e.set();
            }
        }
    }
}
