//! ## warden-core::time
//! **Wall clocks & duration strings**
//!
//! The restorer and the simulated workers read time through [`Clock`] so
//! elapsed-downtime corrections can be driven deterministically.

mod duration;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

pub use duration::{parse_duration, parse_seconds, DurationParseError};

/// Source of "now" for ban bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The host's real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    epoch: DateTime<Utc>,
    offset_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            offset_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let offset = TimeDelta::milliseconds(self.offset_ms.load(Ordering::Acquire));
        self.epoch + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let epoch = Utc.timestamp_opt(1_000, 0).unwrap();
        let clock = ManualClock::new(epoch);
        assert_eq!(clock.now(), epoch);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now().timestamp(), 1_090);

        let shared = clock.clone();
        shared.advance(Duration::from_millis(500));
        assert_eq!(clock.now().timestamp_millis(), 1_090_500);
    }
}
