//! Integer intervals used by each schedule field.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ScheduleError;

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub from: i64,
    pub to: i64,
}

impl Range {
    /// Create a range, swapping the bounds if they are given backwards.
    pub fn new(from: i64, to: i64) -> Self {
        if from > to {
            Self { from: to, to: from }
        } else {
            Self { from, to }
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.from && value <= self.to
    }

    /// True when one range ends exactly one before the other starts.
    pub fn touches(&self, that: &Range) -> bool {
        that.to.checked_add(1) == Some(self.from) || self.to.checked_add(1) == Some(that.from)
    }

    pub fn overlaps(&self, that: &Range) -> bool {
        self.from <= that.to && that.from <= self.to
    }

    /// Merge two touching or overlapping ranges into one.
    pub fn combine(&self, that: &Range) -> Option<Range> {
        if self.touches(that) || self.overlaps(that) {
            Some(Range::new(self.from.min(that.from), self.to.max(that.to)))
        } else {
            None
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}:{}", self.from, self.to)
        }
    }
}

/// Union of inclusive ranges plus a set of step divisors.
///
/// A value is in the interval when it falls in any range, or when it is an
/// exact multiple of any step. Zero is a multiple of every step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interval {
    ranges: Vec<Range>,
    steps: BTreeSet<i64>,
}

impl Interval {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interval matching every value.
    pub fn any() -> Self {
        let mut interval = Self::new();
        interval.add_range(i64::MIN, i64::MAX);
        interval
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn steps(&self) -> impl Iterator<Item = i64> + '_ {
        self.steps.iter().copied()
    }

    pub fn contains(&self, value: i64) -> bool {
        if self.steps.iter().any(|step| value % step == 0) {
            return true;
        }
        self.ranges.iter().any(|range| range.contains(value))
    }

    pub fn add(&mut self, value: i64) {
        self.add_range(value, value);
    }

    /// Insert a range, merging it with every stored range it touches or overlaps.
    pub fn add_range(&mut self, from: i64, to: i64) {
        let mut merged = Range::new(from, to);
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for existing in self.ranges.drain(..) {
            match merged.combine(&existing) {
                Some(combined) => merged = combined,
                None => kept.push(existing),
            }
        }
        kept.push(merged);
        kept.sort_by_key(|range| range.from);
        self.ranges = kept;
    }

    /// Add a `*/step` divisor. Steps must be positive.
    pub fn add_step(&mut self, step: i64) {
        if step > 0 {
            self.steps.insert(step);
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ranges: Vec<String> = self.ranges.iter().map(ToString::to_string).collect();
        let steps: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
        write!(f, "Ranges:{} Steps:{}", ranges.join(","), steps.join(","))
    }
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn parse_number(token: &str, segment: &str) -> Result<i64, ScheduleError> {
    token.parse::<i64>().map_err(|_| ScheduleError::InvalidField { segment: segment.to_string() })
}

impl FromStr for Interval {
    type Err = ScheduleError;

    /// Parse one schedule field.
    ///
    /// Comma separated tokens, each one of `*`, `N`, `N-`, `-N`, `A-B` or `*/N`.
    fn from_str(segment: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidField { segment: segment.to_string() };
        if segment.is_empty() || segment.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let mut interval = Interval::new();
        for token in segment.split(',') {
            if token == "*" {
                interval.add_range(i64::MIN, i64::MAX);
            } else if let Some(step) = token.strip_prefix("*/") {
                if !is_number(step) || step.starts_with('0') {
                    return Err(invalid());
                }
                interval.add_step(parse_number(step, segment)?);
            } else if is_number(token) {
                interval.add(parse_number(token, segment)?);
            } else if let Some(from) = token.strip_suffix('-').filter(|from| is_number(from)) {
                interval.add_range(parse_number(from, segment)?, i64::MAX);
            } else if let Some(to) = token.strip_prefix('-').filter(|to| is_number(to)) {
                interval.add_range(i64::MIN, parse_number(to, segment)?);
            } else if let Some((from, to)) = token.split_once('-') {
                if !is_number(from) || !is_number(to) {
                    return Err(invalid());
                }
                interval.add_range(parse_number(from, segment)?, parse_number(to, segment)?);
            } else {
                return Err(invalid());
            }
        }
        Ok(interval)
    }
}
