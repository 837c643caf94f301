//! Cron-like schedules.
//!
//! A schedule string has exactly seven whitespace separated fields:
//!
//! ```text
//!     * * * * * * *
//!     | | | | | | +-- Year
//!     | | | | | +---- Month (1-12)
//!     | | | | +------ Day of week (0-6, Sunday is 0)
//!     | | | +-------- Day of month (1-31)
//!     | | +---------- Hour (0-23)
//!     | +------------ Minute (0-59)
//!     +-------------- Second (0-59)
//! ```
//!
//! Each field accepts comma separated tokens, freely mixed:
//! `N`, `A-B`, `N-` (N and above), `-N` (N and below), `*/N` (multiples of N)
//! and `*`. For example `3,6,10-15,30-`.

mod interval;

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Timelike};
use tracing::trace;

use crate::error::ScheduleError;

pub use interval::{Interval, Range};

/// Number of fields in a schedule string.
pub const SCHEDULE_FIELDS: usize = 7;

/// A parsed schedule answering whether a point in time matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    syntax: String,
    second: Interval,
    minute: Interval,
    hour: Interval,
    day: Interval,
    day_of_week: Interval,
    month: Interval,
    year: Interval,
}

impl Schedule {
    /// Parse a seven field schedule string.
    pub fn parse(schedule: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = schedule.split_whitespace().collect();
        if fields.len() != SCHEDULE_FIELDS {
            return Err(ScheduleError::FieldCount {
                expected: SCHEDULE_FIELDS,
                found: fields.len(),
                schedule: schedule.to_string(),
            });
        }

        Ok(Self {
            syntax: schedule.to_string(),
            second: fields[0].parse()?,
            minute: fields[1].parse()?,
            hour: fields[2].parse()?,
            day: fields[3].parse()?,
            day_of_week: fields[4].parse()?,
            month: fields[5].parse()?,
            year: fields[6].parse()?,
        })
    }

    /// Schedule matching every second.
    pub fn every_second() -> Self {
        Self {
            syntax: "* * * * * * *".to_string(),
            second: Interval::any(),
            minute: Interval::any(),
            hour: Interval::any(),
            day: Interval::any(),
            day_of_week: Interval::any(),
            month: Interval::any(),
            year: Interval::any(),
        }
    }

    /// The original schedule string.
    pub fn syntax(&self) -> &str {
        &self.syntax
    }

    /// True when every field matches the corresponding component of `time`.
    pub fn matches<T: Datelike + Timelike>(&self, time: &T) -> bool {
        let matched = self.second.contains(i64::from(time.second()))
            && self.minute.contains(i64::from(time.minute()))
            && self.hour.contains(i64::from(time.hour()))
            && self.day.contains(i64::from(time.day()))
            && self.month.contains(i64::from(time.month()))
            && self.year.contains(i64::from(time.year()))
            && self.day_of_week.contains(i64::from(time.weekday().num_days_from_sunday()));

        if matched {
            trace!(schedule = %self.syntax, "time matches schedule");
        }
        matched
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(schedule: &str) -> Result<Self, Self::Err> {
        Schedule::parse(schedule)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.syntax)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .unwrap()
    }

    #[test]
    fn test_parse_valid_schedules() {
        assert!(Schedule::parse("* * * * * * *").is_ok());
        assert!(Schedule::parse(
            "1,4,6,12-23    1,4,6,12-23 1,4,6,12-23  1,4,6,12-23 1,4,6,12-23 1,4,6,12-23 1,4,6,12-23,40-,-50"
        )
        .is_ok());
    }

    #[test]
    fn test_wrong_field_count() {
        let err = Schedule::parse("* * * * * *").unwrap_err();
        assert!(matches!(err, ScheduleError::FieldCount { expected: 7, found: 6, .. }));
    }

    #[test]
    fn test_invalid_field_is_reported() {
        let err = Schedule::parse("* * x * * * *").unwrap_err();
        assert_eq!(err, ScheduleError::InvalidField { segment: "x".to_string() });
    }

    #[test]
    fn test_exact_schedule_boundaries() {
        let schedule = Schedule::parse("10 20 15 14 * 4 2020").unwrap();
        assert!(schedule.matches(&at(2020, 4, 14, 15, 20, 10)));
        assert!(!schedule.matches(&at(2020, 4, 14, 15, 20, 11)));
        assert!(!schedule.matches(&at(2020, 4, 14, 15, 20, 9)));
        assert!(!schedule.matches(&at(2021, 4, 14, 15, 20, 10)));
    }

    #[test]
    fn test_every_other_second() {
        let schedule = Schedule::parse("*/2 * * * * * *").unwrap();
        for second in 10..20 {
            assert_eq!(schedule.matches(&at(2020, 4, 14, 15, 20, second)), second % 2 == 0);
        }
    }

    #[test]
    fn test_day_of_week_field() {
        // 2020-04-14 was a Tuesday.
        let tuesday = Schedule::parse("* * * * 2 * *").unwrap();
        assert!(tuesday.matches(&at(2020, 4, 14, 0, 0, 0)));
        assert!(!tuesday.matches(&at(2020, 4, 15, 0, 0, 0)));
    }

    #[test]
    fn test_every_second_matches_anything() {
        assert!(Schedule::every_second().matches(&at(1999, 12, 31, 23, 59, 59)));
    }
}
