//! Lightweight re-entrant lock.
//!
//! Unlike [`Mutex`](super::Mutex), a critical section has no timeout and
//! cannot take part in a [`MultiWait`](super::MultiWait).

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Held lock on a [`CriticalSection`]; unlocks on drop.
pub type CriticalSectionGuard<'a> = ReentrantMutexGuard<'a, ()>;

#[derive(Debug, Default)]
pub struct CriticalSection {
    inner: ReentrantMutex<()>,
}

impl CriticalSection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the section, blocking until available. Re-entry by the holder never blocks.
    pub fn lock(&self) -> CriticalSectionGuard<'_> {
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<CriticalSectionGuard<'_>> {
        self.inner.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}
