//! Billing period arithmetic.
//!
//! A [`Period`] is a start instant advanced by `count` units of an
//! [`Interval`]. Month and year steps use calendar arithmetic and clamp to
//! the last valid day of the target month (Jan 31 + 1 month = Feb 29 in a
//! leap year).

use crate::{Clock, Result, SubscriptionError};
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calendar unit a period is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Day,
    Week,
    Month,
    Year,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Move `from` forward (`count > 0`) or backward (`count < 0`) by `count` units.
    pub fn shift(&self, from: DateTime<Utc>, count: i64) -> Result<DateTime<Utc>> {
        let out_of_range = || {
            SubscriptionError::InvalidArgument(format!(
                "shifting {from} by {count} {self}(s) is out of range"
            ))
        };

        match self {
            Self::Day | Self::Week => {
                let days = if *self == Self::Week {
                    count.checked_mul(7).ok_or_else(out_of_range)?
                } else {
                    count
                };
                let delta = Duration::try_days(days).ok_or_else(out_of_range)?;
                from.checked_add_signed(delta).ok_or_else(out_of_range)
            }
            Self::Month | Self::Year => {
                let months = if *self == Self::Year {
                    count.checked_mul(12).ok_or_else(out_of_range)?
                } else {
                    count
                };
                let magnitude = u32::try_from(months.unsigned_abs()).map_err(|_| out_of_range())?;
                let shifted = if months >= 0 {
                    from.checked_add_months(Months::new(magnitude))
                } else {
                    from.checked_sub_months(Months::new(magnitude))
                };
                shifted.ok_or_else(out_of_range)
            }
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = SubscriptionError;

    /// Accepts singular or plural unit names, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "days" => Ok(Self::Day),
            "week" | "weeks" => Ok(Self::Week),
            "month" | "months" => Ok(Self::Month),
            "year" | "years" => Ok(Self::Year),
            other => Err(SubscriptionError::InvalidArgument(format!(
                "unknown interval unit: {other:?}"
            ))),
        }
    }
}

/// A `count × interval` length, as configured on plans (trial, grace,
/// invoice) and on feature reset windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSpec {
    pub period: u32,
    pub interval: Interval,
}

impl PeriodSpec {
    pub fn new(period: u32, interval: Interval) -> Result<Self> {
        if period == 0 {
            return Err(SubscriptionError::InvalidArgument(
                "period count must be at least 1".to_string(),
            ));
        }
        Ok(Self { period, interval })
    }

    /// A spec is only present when both halves are configured.
    pub fn from_parts(period: Option<u32>, interval: Option<Interval>) -> Option<Self> {
        match (period, interval) {
            (Some(period), Some(interval)) if period > 0 => Some(Self { period, interval }),
            _ => None,
        }
    }

    /// Instant reached after one full spec from `start`.
    pub fn end_from(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.interval.shift(start, i64::from(self.period))
    }
}

impl Default for PeriodSpec {
    fn default() -> Self {
        Self {
            period: 1,
            interval: Interval::Month,
        }
    }
}

impl fmt::Display for PeriodSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(s)", self.period, self.interval)
    }
}

/// Start and end of one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: Interval,
    count: u32,
}

impl Period {
    /// Compute the period starting at `start`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `count` is zero or the end is not representable.
    ///
    /// ```rust
    /// use plan_subscriptions::{Interval, Period};
    /// use chrono::{TimeZone, Utc};
    ///
    /// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    /// let period = Period::new(start, Interval::Month, 1).unwrap();
    /// assert_eq!(period.end(), Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    /// ```
    pub fn new(start: DateTime<Utc>, interval: Interval, count: u32) -> Result<Self> {
        let spec = PeriodSpec::new(count, interval)?;
        Ok(Self {
            start,
            end: spec.end_from(start)?,
            interval,
            count,
        })
    }

    /// Compute the period starting at `start`, or now when no start is given.
    pub fn compute(
        start: Option<DateTime<Utc>>,
        interval: Interval,
        count: u32,
        clock: &dyn Clock,
    ) -> Result<Self> {
        Self::new(start.unwrap_or_else(|| clock.now()), interval, count)
    }

    pub fn from_spec(start: DateTime<Utc>, spec: &PeriodSpec) -> Result<Self> {
        Self::new(start, spec.interval, spec.period)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// The period of the same length that starts where this one ends.
    pub fn next(&self) -> Result<Self> {
        Self::new(self.end, self.interval, self.count)
    }
}

/// A signed relative shift such as `"+2 weeks"` or `"-1 month"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalOffset {
    pub count: i64,
    pub interval: Interval,
}

impl IntervalOffset {
    pub fn new(count: i64, interval: Interval) -> Self {
        Self { count, interval }
    }

    pub fn apply(&self, to: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.interval.shift(to, self.count)
    }
}

impl FromStr for IntervalOffset {
    type Err = SubscriptionError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || SubscriptionError::InvalidArgument(format!("invalid interval offset: {s:?}"));

        let mut parts = s.split_whitespace();
        let (count, unit) = match (parts.next(), parts.next(), parts.next()) {
            (Some(count), Some(unit), None) => (count, unit),
            _ => return Err(invalid()),
        };
        let count = count
            .strip_prefix('+')
            .unwrap_or(count)
            .parse::<i64>()
            .map_err(|_| invalid())?;

        Ok(Self {
            count,
            interval: unit.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedClock;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_period_end_per_interval() {
        let start = utc(2024, 1, 1);
        assert_eq!(Period::new(start, Interval::Day, 10).unwrap().end(), utc(2024, 1, 11));
        assert_eq!(Period::new(start, Interval::Week, 2).unwrap().end(), utc(2024, 1, 15));
        assert_eq!(Period::new(start, Interval::Month, 1).unwrap().end(), utc(2024, 2, 1));
        assert_eq!(Period::new(start, Interval::Year, 1).unwrap().end(), utc(2025, 1, 1));
    }

    #[test]
    fn test_month_end_clamps() {
        let period = Period::new(utc(2024, 1, 31), Interval::Month, 1).unwrap();
        assert_eq!(period.end(), utc(2024, 2, 29));

        let period = Period::new(utc(2024, 2, 29), Interval::Year, 1).unwrap();
        assert_eq!(period.end(), utc(2025, 2, 28));
    }

    #[test]
    fn test_zero_count_is_rejected() {
        let err = Period::new(utc(2024, 1, 1), Interval::Month, 0).unwrap_err();
        assert!(matches!(err, SubscriptionError::InvalidArgument(_)));
    }

    #[test]
    fn test_compute_defaults_to_clock() {
        let clock = FixedClock::new(utc(2024, 5, 5));
        let period = Period::compute(None, Interval::Week, 1, &clock).unwrap();
        assert_eq!(period.start(), utc(2024, 5, 5));
        assert_eq!(period.end(), utc(2024, 5, 12));
        assert_eq!(period.count(), 1);
        assert_eq!(period.interval(), Interval::Week);
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("Month".parse::<Interval>().unwrap(), Interval::Month);
        assert_eq!("days".parse::<Interval>().unwrap(), Interval::Day);
        assert!(matches!(
            "fortnight".parse::<Interval>(),
            Err(SubscriptionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_spec_requires_both_parts() {
        assert!(PeriodSpec::from_parts(Some(7), None).is_none());
        assert!(PeriodSpec::from_parts(None, Some(Interval::Day)).is_none());
        assert_eq!(
            PeriodSpec::from_parts(Some(7), Some(Interval::Day)),
            Some(PeriodSpec {
                period: 7,
                interval: Interval::Day
            })
        );
    }

    #[test]
    fn test_interval_offset_parsing() {
        let offset: IntervalOffset = "+2 weeks".parse().unwrap();
        assert_eq!(offset, IntervalOffset::new(2, Interval::Week));
        assert_eq!(offset.apply(utc(2024, 1, 1)).unwrap(), utc(2024, 1, 15));

        let offset: IntervalOffset = "-1 month".parse().unwrap();
        assert_eq!(offset.apply(utc(2024, 3, 31)).unwrap(), utc(2024, 2, 29));

        assert!("soon".parse::<IntervalOffset>().is_err());
        assert!("2 weeks later".parse::<IntervalOffset>().is_err());
    }

    #[test]
    fn test_next_period_is_contiguous() {
        let first = Period::new(utc(2024, 1, 1), Interval::Month, 1).unwrap();
        let second = first.next().unwrap();
        assert_eq!(second.start(), first.end());
        assert_eq!(second.end(), utc(2024, 3, 1));
    }
}
