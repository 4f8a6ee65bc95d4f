//! Time constraint for driver operations.
use std::time::{Duration, Instant};

/// Absolute time limit for an operation.
///
/// [`Deadline::None`] means unbounded. Arithmetic saturates: a timeout too
/// large to represent becomes unbounded, and [`time_left`][Deadline::time_left]
/// clamps at zero once the deadline has passed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Deadline {
    /// No time limit.
    #[default]
    None,
    /// Operation must complete before this time point.
    At(Instant),
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Deadline {
        Self::after_at(timeout, Instant::now())
    }

    pub(crate) fn after_at(timeout: Duration, now: Instant) -> Deadline {
        match now.checked_add(timeout) {
            Some(at) => Deadline::At(at),
            None => Deadline::None,
        }
    }

    /// Returns the remaining time budget, [`None`] when unbounded.
    ///
    /// Clamped at [`Duration::ZERO`] once the deadline has passed.
    pub fn time_left(&self) -> Option<Duration> {
        self.time_left_at(Instant::now())
    }

    pub(crate) fn time_left_at(&self, now: Instant) -> Option<Duration> {
        match self {
            Deadline::None => None,
            Deadline::At(at) => Some(at.saturating_duration_since(now)),
        }
    }

    /// Returns `true` when the deadline has been reached.
    pub fn expired(&self) -> bool {
        self.expired_at(Instant::now())
    }

    pub(crate) fn expired_at(&self, now: Instant) -> bool {
        match self {
            Deadline::None => false,
            Deadline::At(at) => now >= *at,
        }
    }

    /// Timer resolving at the deadline, [`None`] when unbounded.
    #[cfg(feature = "tokio")]
    pub(crate) fn sleep(&self) -> Option<std::pin::Pin<Box<tokio::time::Sleep>>> {
        match self {
            Deadline::None => None,
            Deadline::At(at) => Some(Box::pin(tokio::time::sleep_until(
                tokio::time::Instant::from_std(*at),
            ))),
        }
    }
}

impl From<Duration> for Deadline {
    fn from(timeout: Duration) -> Self {
        Deadline::after(timeout)
    }
}

impl From<Instant> for Deadline {
    fn from(at: Instant) -> Self {
        Deadline::At(at)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn after_keeps_time_point_for_representable_timeout() {
        let now = Instant::now();
        assert_eq!(
            Deadline::after_at(Duration::from_secs(1), now),
            Deadline::At(now + Duration::from_secs(1)),
        );
    }

    #[test]
    fn after_saturates_to_unbounded() {
        assert_eq!(Deadline::after_at(Duration::MAX, Instant::now()), Deadline::None);
    }

    #[test]
    fn time_left_for_time_point_before_deadline() {
        let now = Instant::now();
        let deadline = Deadline::At(now + Duration::from_secs(1));
        assert_eq!(deadline.time_left_at(now), Some(Duration::from_secs(1)));
    }

    #[test]
    fn time_left_is_zero_at_or_past_deadline() {
        let now = Instant::now();
        assert_eq!(Deadline::At(now).time_left_at(now), Some(Duration::ZERO));
        assert_eq!(
            Deadline::At(now).time_left_at(now + Duration::from_secs(1)),
            Some(Duration::ZERO),
        );
    }

    #[test]
    fn unbounded_never_expires() {
        assert!(!Deadline::None.expired_at(Instant::now()));
        assert_eq!(Deadline::None.time_left_at(Instant::now()), None);
    }

    #[test]
    fn expired_at_and_past_deadline() {
        let now = Instant::now();
        assert!(!Deadline::At(now + Duration::from_secs(1)).expired_at(now));
        assert!(Deadline::At(now).expired_at(now));
        assert!(Deadline::At(now).expired_at(now + Duration::from_secs(1)));
    }
}
