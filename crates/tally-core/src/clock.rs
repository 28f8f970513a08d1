//! Wall-clock helpers and the open-hours window

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};

pub const SECS_PER_HOUR: u32 = 3_600;
pub const SECS_PER_DAY: u32 = 86_400;

/// Wall-clock time source supplied by the platform.
pub trait Clock {
    /// Seconds since the Unix epoch. Meaningless unless [`Clock::is_valid`].
    fn now(&self) -> u32;

    /// Whether the wall clock has been synchronised.
    fn is_valid(&self) -> bool;

    /// Offset of local time from UTC in seconds.
    fn utc_offset_secs(&self) -> i32;

    /// Monotonic milliseconds, used for budgets and debounce.
    fn uptime_ms(&self) -> u64;
}

/// A wall-clock instant broken down in the device's local timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    /// Hour of day, 0-23
    pub hour: u8,
    /// Seconds since local midnight
    pub second_of_day: u32,
    /// Local calendar day, days since 0001-01-01
    pub day_number: i32,
}

impl LocalTime {
    pub fn from_unix(unix: u32, utc_offset_secs: i32) -> Self {
        // Offsets outside +-24h are rejected by chrono; treat them as UTC.
        let tz = FixedOffset::east_opt(utc_offset_secs).unwrap_or_else(|| Utc.fix());

        match DateTime::from_timestamp(i64::from(unix), 0) {
            Some(utc) => {
                let local = utc.with_timezone(&tz);
                Self {
                    hour: local.hour() as u8,
                    second_of_day: local.num_seconds_from_midnight(),
                    day_number: local.date_naive().num_days_from_ce(),
                }
            }
            None => {
                let shifted = i64::from(unix) + i64::from(tz.local_minus_utc());
                let sod = shifted.rem_euclid(i64::from(SECS_PER_DAY)) as u32;
                Self {
                    hour: (sod / SECS_PER_HOUR) as u8,
                    second_of_day: sod,
                    day_number: shifted.div_euclid(i64::from(SECS_PER_DAY)) as i32,
                }
            }
        }
    }

    pub fn from_clock(clock: &dyn Clock) -> Self {
        Self::from_unix(clock.now(), clock.utc_offset_secs())
    }
}

/// Local-time window during which the device is expected to sense and report.
///
/// `open == close` means always open. `open > close` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenHours {
    pub open: u8,
    pub close: u8,
}

impl OpenHours {
    pub const fn new(open: u8, close: u8) -> Self {
        Self { open, close }
    }

    pub const fn is_always_open(&self) -> bool {
        self.open == self.close
    }

    pub fn contains_hour(&self, hour: u8) -> bool {
        if self.is_always_open() {
            true
        } else if self.open < self.close {
            hour >= self.open && hour < self.close
        } else {
            hour >= self.open || hour < self.close
        }
    }

    pub fn is_open(&self, local: &LocalTime) -> bool {
        self.contains_hour(local.hour)
    }

    /// Seconds from `local` until the next opening time. Zero while open.
    pub fn seconds_until_open(&self, local: &LocalTime) -> u32 {
        if self.is_open(local) {
            return 0;
        }
        let open_at = u32::from(self.open) * SECS_PER_HOUR;
        if local.second_of_day < open_at {
            open_at - local.second_of_day
        } else {
            SECS_PER_DAY - local.second_of_day + open_at
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_hour(hour: u8) -> LocalTime {
        LocalTime {
            hour,
            second_of_day: u32::from(hour) * SECS_PER_HOUR,
            day_number: 0,
        }
    }

    #[test]
    fn test_closed_late_evening() {
        let hours = OpenHours::new(6, 22);
        let local = at_hour(23);
        assert!(!hours.is_open(&local));
        assert_eq!(hours.seconds_until_open(&local), 25_200);
    }

    #[test]
    fn test_before_opening_same_day() {
        let hours = OpenHours::new(6, 22);
        let local = LocalTime {
            hour: 4,
            second_of_day: 4 * SECS_PER_HOUR + 1_800,
            day_number: 0,
        };
        assert_eq!(hours.seconds_until_open(&local), 5_400);
    }

    #[test]
    fn test_overnight_window() {
        let hours = OpenHours::new(20, 4);
        assert!(hours.contains_hour(23));
        assert!(hours.contains_hour(0));
        assert!(hours.contains_hour(3));
        assert!(!hours.contains_hour(4));
        assert!(!hours.contains_hour(12));
        assert_eq!(hours.seconds_until_open(&at_hour(12)), 8 * SECS_PER_HOUR);
    }

    #[test]
    fn test_equal_hours_always_open() {
        let hours = OpenHours::new(0, 0);
        for h in 0..24 {
            assert!(hours.contains_hour(h));
        }
    }

    #[test]
    fn test_local_time_applies_offset() {
        // 2024-01-01T00:30:00Z
        let unix = 1_704_069_000;
        let utc = LocalTime::from_unix(unix, 0);
        assert_eq!(utc.hour, 0);
        assert_eq!(utc.second_of_day, 1_800);

        let behind = LocalTime::from_unix(unix, -3_600);
        assert_eq!(behind.hour, 23);
        assert_eq!(behind.day_number, utc.day_number - 1);
    }
}
