/*!
    Monotonic microsecond clocks.
*/

use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/**
    Trait for monotonic clocks reporting microseconds.

    The frame converter stamps decode timestamps relative to the moment a
    session started, so only differences between two readings matter. The
    absolute value is arbitrary but must never go backwards.
*/
pub trait Clock: Send + Sync {
    /// Current time in microseconds.
    fn now_micros(&self) -> i64;
}

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/**
    Process-wide monotonic clock.

    All instances share one epoch, taken the first time any of them is
    read, so readings from different instances are comparable.
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl WallClock {
    /**
        Create a new wall clock.
    */
    pub fn new() -> Self {
        // Pin the epoch now rather than on first read
        process_epoch();
        Self
    }
}

impl Clock for WallClock {
    fn now_micros(&self) -> i64 {
        let elapsed = process_epoch().elapsed();
        i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX)
    }
}

/**
    Manually driven clock.

    Reads return whatever was last set, which makes timestamp derivation
    deterministic in tests.
*/
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    /**
        Create a manual clock starting at the given time.
    */
    pub fn new(micros: i64) -> Self {
        Self {
            micros: AtomicI64::new(micros),
        }
    }

    /**
        Set the current time.
    */
    pub fn set(&self, micros: i64) {
        self.micros.store(micros, Ordering::SeqCst);
    }

    /**
        Move the clock forward by `micros`.
    */
    pub fn advance(&self, micros: i64) {
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.micros.load(Ordering::SeqCst)
    }
}

static_assertions::assert_impl_all!(WallClock: Send, Sync, Clock);
static_assertions::assert_impl_all!(ManualClock: Send, Sync, Clock);

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wall_clock_is_monotonic() {
        let clock = WallClock::new();
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(a >= 0);
        assert!(b >= a);
    }

    #[test]
    fn wall_clock_advances() {
        let clock = WallClock::new();
        let before = clock.now_micros();
        std::thread::sleep(Duration::from_millis(20));
        let after = clock.now_micros();

        // Allow tolerance for scheduling
        assert!(after - before >= 15_000);
    }

    #[test]
    fn wall_clocks_share_epoch() {
        let a = WallClock::new();
        std::thread::sleep(Duration::from_millis(5));
        let b = WallClock::new();
        let diff = (b.now_micros() - a.now_micros()).abs();
        assert!(diff < 5_000);
    }

    #[test]
    fn manual_clock_set_and_advance() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_micros(), 100);

        clock.advance(50);
        assert_eq!(clock.now_micros(), 150);

        clock.set(10);
        assert_eq!(clock.now_micros(), 10);
    }

    #[test]
    fn manual_clock_as_trait_object() {
        let clock: std::sync::Arc<dyn Clock> = std::sync::Arc::new(ManualClock::new(7));
        assert_eq!(clock.now_micros(), 7);
    }
}
