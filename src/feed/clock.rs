use chrono::{DateTime, Duration, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::cell::Cell;

use super::TimeSource;

/// Wall clock shifted onto the broker's candle clock.
///
/// Brokers stamp candles in their own server time. Either a fixed offset or a
/// named timezone (DST-aware) maps UTC onto that clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset_minutes: i64,
    timezone: Option<Tz>,
}

impl SystemClock {
    pub fn new(offset_minutes: i64) -> Self {
        Self {
            offset_minutes,
            timezone: None,
        }
    }

    pub fn with_timezone(timezone: Tz) -> Self {
        Self {
            offset_minutes: 0,
            timezone: Some(timezone),
        }
    }

    /// Map a UTC instant onto broker time
    pub fn align(&self, utc: DateTime<Utc>) -> DateTime<Utc> {
        match self.timezone {
            Some(tz) => {
                let offset = tz.offset_from_utc_datetime(&utc.naive_utc()).fix();
                utc + Duration::seconds(offset.local_minus_utc() as i64)
            }
            None => utc + Duration::minutes(self.offset_minutes),
        }
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        self.align(Utc::now())
    }
}

/// Settable clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Cell<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Cell::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_offset() {
        let utc = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let clock = SystemClock::new(180);
        assert_eq!(clock.align(utc), Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap());
    }

    #[test]
    fn test_timezone_follows_dst() {
        let clock = SystemClock::with_timezone(chrono_tz::Europe::Athens);
        let summer = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let winter = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        assert_eq!(clock.align(summer), Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap());
        assert_eq!(clock.align(winter), Utc.with_ymd_and_hms(2024, 1, 3, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }
}
