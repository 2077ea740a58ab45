use parking_lot::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of "now" for usage accounting, as a duration since the UNIX epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to. Used to simulate window expiry.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn at_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn set(&self, now: Duration) {
        *self.now.lock() = now;
    }

    pub fn set_secs(&self, secs: u64) {
        self.set(Duration::from_secs(secs));
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

pub fn now_ts() -> u64 {
    SystemClock.now().as_secs()
}

pub fn now_instant() -> Instant {
    Instant::now()
}

pub fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
