use std::time::Duration;

/// Monotonic point in time.
///
/// Every time-dependent operation in the protocol core takes `now` as an
/// argument instead of reading the clock itself, so tests can drive time by
/// hand with `add_millis`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    inner: std::time::Instant,
}

impl Instant {
    /// Creates an Instant from the moment the method is called
    pub fn now() -> Self {
        Self {
            inner: std::time::Instant::now(),
        }
    }

    /// Returns time elapsed since the Instant, as measured at `now`.
    /// Saturates to zero when `now` is earlier than `self`.
    pub fn elapsed(&self, now: &Self) -> Duration {
        now.inner.saturating_duration_since(self.inner)
    }

    /// Returns time remaining until the Instant, as measured at `now`.
    /// Saturates to zero once the Instant has passed.
    pub fn until(&self, now: &Self) -> Duration {
        self.inner.saturating_duration_since(now.inner)
    }

    /// Whether the Instant is strictly later than `other`
    pub fn is_after(&self, other: &Self) -> bool {
        self.inner > other.inner
    }

    pub fn add_millis(&mut self, millis: u32) {
        self.inner += Duration::from_millis(u64::from(millis));
    }

    pub fn add_duration(&mut self, duration: Duration) {
        self.inner += duration;
    }

    /// Returns a copy of the Instant moved forward by `duration`
    pub fn plus(&self, duration: Duration) -> Self {
        Self {
            inner: self.inner + duration,
        }
    }

    pub fn inner(&self) -> std::time::Instant {
        self.inner
    }
}
