use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time source injected into the engine. All staleness decisions and the
/// SQL `now()` function go through it, so tests can pin the clock.
pub trait Clock: Send + Sync + std::panic::RefUnwindSafe {
    /// Current time in epoch seconds.
    fn now(&self) -> i64;
    /// Pause; the fake advances itself instead of blocking.
    fn sleep(&self, duration: Duration);
}

pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A settable clock for tests, tracked in milliseconds so sub-second
/// sleeps are observable.
pub struct FakeClock(AtomicI64);

impl FakeClock {
    pub fn new(epoch: i64) -> FakeClock {
        FakeClock(AtomicI64::new(epoch * 1_000))
    }

    pub fn set(&self, epoch: i64) {
        self.0.store(epoch * 1_000, Ordering::SeqCst);
    }

    pub fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst) / 1_000
    }

    fn sleep(&self, duration: Duration) {
        self.0
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}
