use chrono::{DateTime, Utc};

/// Source of the current time for everything in the SDK that needs "now":
/// event timestamps, relative-date filters and the sent-flag cache.
/// Injectable so tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
