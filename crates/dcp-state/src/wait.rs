//! Wait strategies pacing the state-machine polling loop.

use std::fmt::Debug;
use std::time::Duration;

use parking_lot::Mutex;

/// Decides how long the loop sleeps between ticks.
pub trait WaitStrategy: Send + Sync + Debug {
    /// Delay before the next tick. `found_work` is whether the last tick
    /// claimed anything; a busy loop keeps draining without sleeping.
    fn next_delay(&self, found_work: bool) -> Duration;
}

/// Sleeps a fixed interval whenever a tick finds nothing.
#[derive(Debug, Clone, Copy)]
pub struct FixedWaitStrategy {
    interval: Duration,
}

impl FixedWaitStrategy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedWaitStrategy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl WaitStrategy for FixedWaitStrategy {
    fn next_delay(&self, found_work: bool) -> Duration {
        if found_work {
            Duration::ZERO
        } else {
            self.interval
        }
    }
}

/// Doubles the idle delay on every empty tick, up to `max`, and resets
/// once work is found.
#[derive(Debug)]
pub struct BackoffWaitStrategy {
    base: Duration,
    max: Duration,
    current: Mutex<Duration>,
}

impl BackoffWaitStrategy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: Mutex::new(base),
        }
    }
}

impl WaitStrategy for BackoffWaitStrategy {
    fn next_delay(&self, found_work: bool) -> Duration {
        let mut current = self.current.lock();
        if found_work {
            *current = self.base;
            return Duration::ZERO;
        }
        let delay = *current;
        *current = (*current * 2).min(self.max);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_strategy() {
        let s = FixedWaitStrategy::default();
        assert_eq!(s.next_delay(false), Duration::from_millis(500));
        assert_eq!(s.next_delay(true), Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_and_resets() {
        let s = BackoffWaitStrategy::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(s.next_delay(false), Duration::from_millis(100));
        assert_eq!(s.next_delay(false), Duration::from_millis(200));
        assert_eq!(s.next_delay(false), Duration::from_millis(350));
        assert_eq!(s.next_delay(false), Duration::from_millis(350));
        assert_eq!(s.next_delay(true), Duration::ZERO);
        assert_eq!(s.next_delay(false), Duration::from_millis(100));
    }
}
