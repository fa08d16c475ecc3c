//! Wait bounds.

use std::time::{Duration, Instant};

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Block until signaled, no matter how long.
    Infinite,
    /// Block for at most this long.
    After(Duration),
}

impl Timeout {
    /// Poll without blocking.
    pub const ZERO: Timeout = Timeout::After(Duration::ZERO);

    /// Legacy millisecond sentinel meaning "infinite".
    pub const INFINITE_MS: u32 = u32::MAX;

    /// Millisecond constructor; [`Timeout::INFINITE_MS`] maps to [`Timeout::Infinite`].
    pub fn from_millis(ms: u32) -> Self {
        if ms == Self::INFINITE_MS {
            Self::Infinite
        } else {
            Self::After(Duration::from_millis(u64::from(ms)))
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Self::After(d) if d.is_zero())
    }

    /// Absolute deadline for this bound, `None` when infinite.
    ///
    /// A duration too large to represent as an `Instant` is treated as infinite.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::After(d) => Instant::now().checked_add(*d),
        }
    }

    /// Time left before `deadline`, saturating at zero.
    pub(crate) fn remaining(deadline: Option<Instant>) -> Timeout {
        match deadline {
            None => Timeout::Infinite,
            Some(d) => Timeout::After(d.saturating_duration_since(Instant::now())),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::Infinite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_millis_sentinel() {
        assert_eq!(Timeout::from_millis(u32::MAX), Timeout::Infinite);
        assert_eq!(
            Timeout::from_millis(250),
            Timeout::After(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_zero_and_deadline() {
        assert!(Timeout::ZERO.is_zero());
        assert!(!Timeout::Infinite.is_zero());
        assert!(Timeout::Infinite.deadline().is_none());
        assert!(Timeout::ZERO.deadline().is_some());
    }

    #[test]
    fn test_huge_duration_is_infinite_deadline() {
        let t = Timeout::After(Duration::MAX);
        assert!(t.deadline().is_none());
    }
}
