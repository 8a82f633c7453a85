//! Monotonic time source and hysteresis timers
//!
//! All hysteresis decisions are made against a [`Clock`] so tests and
//! simulations can step time forward explicitly with a [`ManualClock`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of monotonic time
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Seconds elapsed since `since`; zero when `since` is not in the past
    fn elapsed_since(&self, since: Instant) -> f64 {
        self.now().saturating_duration_since(since).as_secs_f64()
    }

    /// Whether strictly more than `seconds` have passed since `since`.
    /// `None` means the event never happened, which always qualifies.
    fn has_elapsed(&self, since: Option<Instant>, seconds: u64) -> bool {
        match since {
            None => true,
            Some(t) => self.elapsed_since(t) > seconds as f64,
        }
    }
}

/// Wall-independent clock backed by `std::time::Instant`
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock; clones share the same time
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// "Seconds since last trigger" timer used for periodic work
#[derive(Debug, Clone)]
pub struct CycleTimer {
    interval: Duration,
    last_trigger: Option<Instant>,
}

impl CycleTimer {
    /// A timer that fires on its first check and then at most once per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_trigger: None,
        }
    }

    /// Whether the interval has passed since the last trigger
    pub fn is_due(&self, clock: &dyn Clock) -> bool {
        match self.last_trigger {
            None => true,
            Some(t) => clock.elapsed_since(t) >= self.interval.as_secs_f64(),
        }
    }

    /// Record a trigger at the current time
    pub fn trigger(&mut self, clock: &dyn Clock) {
        self.last_trigger = Some(clock.now());
    }

    /// Trigger and return true when due, otherwise return false
    pub fn check_and_trigger(&mut self, clock: &dyn Clock) -> bool {
        if self.is_due(clock) {
            self.trigger(clock);
            true
        } else {
            false
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
