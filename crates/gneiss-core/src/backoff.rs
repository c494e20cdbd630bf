use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

/// Exponential retry schedule with a bounded number of attempts.
///
/// After the `k`-th consecutive failure (starting at `k = 1`) the caller waits `base_delay * multiplier^k` and tries again, up
/// to `max_retries` times. The failure after the last retry abandons the work.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Backoff {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Backoff {
    pub const fn new(max_retries: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
            multiplier,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// The wait after `failures` consecutive failures.
    pub fn delay_after_failure(&self, failures: u32) -> Duration {
        let factor = (self.multiplier as u64).saturating_pow(failures);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// `true` if another attempt is allowed after `failures` consecutive failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }

    /// Every wait of a fully failing run, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_retries).map(move |k| self.delay_after_failure(k))
    }

    pub fn total_delay(&self) -> Duration {
        self.schedule().sum()
    }
}

/// Source of the sleeps between retries.
///
/// Production code sleeps for real; tests substitute an implementation that records the requested durations and returns
/// immediately, so retry schedules are checked without wall-clock time.
pub trait Delay {
    fn delay(&self, duration: Duration) -> impl Future<Output = ()>;
}

/// Sleeps on a [`futures_timer::Delay`], which runs its own timer thread and works under any executor.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimerDelay;

impl Delay for TimerDelay {
    fn delay(&self, duration: Duration) -> impl Future<Output = ()> {
        futures_timer::Delay::new(duration)
    }
}

/// Completes immediately and records every requested duration. Clones share the record.
#[derive(Clone, Debug, Default)]
pub struct RecordingDelay {
    requested: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn requested(&self) -> Vec<Duration> {
        self.requested.borrow().clone()
    }

    pub fn total(&self) -> Duration {
        self.requested.borrow().iter().sum()
    }
}

impl Delay for RecordingDelay {
    fn delay(&self, duration: Duration) -> impl Future<Output = ()> {
        self.requested.borrow_mut().push(duration);
        futures::future::ready(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn doubling_schedule() {
        let backoff = Backoff::new(5, Duration::from_millis(5000), 2);

        let schedule: Vec<_> = backoff.schedule().map(|d| d.as_millis()).collect();
        assert_eq!(schedule, vec![10_000, 20_000, 40_000, 80_000, 160_000]);
        assert_eq!(backoff.total_delay(), Duration::from_millis(5000 * (2 + 4 + 8 + 16 + 32)));
    }

    #[test]
    fn retry_budget() {
        let backoff = Backoff::new(3, Duration::from_millis(1), 2);

        assert!(backoff.should_retry(1));
        assert!(backoff.should_retry(3));
        assert!(!backoff.should_retry(4));
    }

    #[test]
    fn huge_exponent_saturates() {
        let backoff = Backoff::new(100, Duration::from_millis(10), 10);

        assert_eq!(backoff.delay_after_failure(64), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn timer_delay_waits() {
        let start = std::time::Instant::now();
        futures::executor::block_on(TimerDelay.delay(Duration::from_millis(5)));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
