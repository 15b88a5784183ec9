//! Cron expression parsing and evaluation.
//!
//! Supports the standard 5-field format `minute hour day month weekday`
//! and the 6-field variant with a leading seconds field. Expressions are
//! evaluated against UTC wall-clock time; `next_after` computes the next
//! firing instant with an inclusive or exclusive reference bound.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

/// Scan bound for `next_after`: one leap year of minutes.
const MAX_SCAN_MINUTES: u32 = 366 * 24 * 60;

/// A parsed cron expression.
///
/// Field ranges: seconds and minutes 0-59, hours 0-23, day of month 1-31,
/// month 1-12, weekday 0-6 with Sunday as 0.
#[derive(Debug, Clone)]
pub struct CronExpression {
    /// Only present for 6-field expressions.
    second: Option<FieldSet>,
    minute: FieldSet,
    hour: FieldSet,
    day: FieldSet,
    month: FieldSet,
    weekday: FieldSet,
}

/// One cron field, expanded at parse time into the set of values it
/// admits. No field exceeds 59, so a 64-bit mask holds any of them.
#[derive(Debug, Clone, Copy)]
struct FieldSet {
    mask: u64,
}

impl FieldSet {
    fn admits(self, value: u32) -> bool {
        value < 64 && self.mask & (1 << value) != 0
    }
}

impl CronExpression {
    /// Parse a cron expression string.
    ///
    /// # Format
    ///
    /// `minute hour day month weekday`, optionally preceded by a seconds
    /// field for 6-field expressions. Each field takes comma-separated
    /// entries of `*`, a value, or a range, any of them with a `/step`.
    ///
    /// # Examples
    ///
    /// - `0 0 * * *` - Daily at midnight
    /// - `*/5 * * * *` - Every 5 minutes
    /// - `30 0 9-17 * * 1-5` - At :30 every hour 9am-5pm, Monday-Friday
    ///
    /// # Errors
    ///
    /// Returns an error if the expression is invalid.
    pub fn parse(expr: &str) -> Result<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let (second, fields) = match parts.len() {
            5 => (None, &parts[..]),
            6 => (
                Some(parse_field(parts[0], 0, 59).context("Invalid second field")?),
                &parts[1..],
            ),
            _ => anyhow::bail!("Cron expression must have 5 or 6 fields: {}", expr),
        };

        Ok(Self {
            second,
            minute: parse_field(fields[0], 0, 59).context("Invalid minute field")?,
            hour: parse_field(fields[1], 0, 23).context("Invalid hour field")?,
            day: parse_field(fields[2], 1, 31).context("Invalid day field")?,
            month: parse_field(fields[3], 1, 12).context("Invalid month field")?,
            weekday: parse_field(fields[4], 0, 6).context("Invalid weekday field")?,
        })
    }

    /// Check if the expression matches the given time.
    ///
    /// 5-field expressions match at minute resolution; the seconds of the
    /// probe time are ignored.
    #[must_use]
    pub fn matches(&self, time: &DateTime<Utc>) -> bool {
        self.matches_minute(time)
            && self
                .second
                .map_or(true, |field| field.admits(time.second()))
    }

    /// Match the minute-and-above fields only.
    fn matches_minute(&self, time: &DateTime<Utc>) -> bool {
        self.minute.admits(time.minute())
            && self.hour.admits(time.hour())
            && self.day.admits(time.day())
            && self.month.admits(time.month())
            && self.weekday.admits(time.weekday().num_days_from_sunday())
    }

    /// Calculate the next firing instant relative to `after`.
    ///
    /// With `include_ref_time` the reference instant itself is a candidate;
    /// otherwise the result is strictly after it. Returns `None` if no
    /// instant matches within the next year.
    #[must_use]
    pub fn next_after(&self, after: &DateTime<Utc>, include_ref_time: bool) -> Option<DateTime<Utc>> {
        match self.second {
            None => self.next_minute_tick(after, include_ref_time),
            Some(field) => self.next_second_tick(after, field, include_ref_time),
        }
    }

    /// Next tick for a 5-field expression: second 0 of a matching minute.
    fn next_minute_tick(
        &self,
        after: &DateTime<Utc>,
        include_ref_time: bool,
    ) -> Option<DateTime<Utc>> {
        let floor = truncate_to_minute(after);
        let mut current = if include_ref_time && floor == *after {
            floor
        } else {
            floor + Duration::minutes(1)
        };

        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches_minute(&current) {
                return Some(current);
            }
            current += Duration::minutes(1);
        }
        None
    }

    /// Next tick for a 6-field expression: first matching second within the
    /// first matching minute.
    fn next_second_tick(
        &self,
        after: &DateTime<Utc>,
        second: FieldSet,
        include_ref_time: bool,
    ) -> Option<DateTime<Utc>> {
        let floor = after.with_nanosecond(0).unwrap_or(*after);
        let start = if include_ref_time && floor == *after {
            floor
        } else {
            floor + Duration::seconds(1)
        };

        let mut minute = truncate_to_minute(&start);
        for scanned in 0..MAX_SCAN_MINUTES {
            if self.matches_minute(&minute) {
                let from = if scanned == 0 { start.second() } else { 0 };
                for sec in from..60 {
                    if second.admits(sec) {
                        return minute.with_second(sec);
                    }
                }
            }
            minute += Duration::minutes(1);
        }
        None
    }
}

/// Drop seconds and sub-second precision.
fn truncate_to_minute(time: &DateTime<Utc>) -> DateTime<Utc> {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(*time)
}

/// Expand one field into its admitted-value set.
///
/// Grammar per comma-separated entry: `<base>` or `<base>/<step>`, where
/// the base is `*`, a single value, or `lo-hi`. A stepped single value
/// (`20/3`) extends to the top of the field, per cron convention.
fn parse_field(field: &str, min: u32, max: u32) -> Result<FieldSet> {
    let mut mask = 0u64;

    for entry in field.split(',') {
        let (base, step) = match entry.split_once('/') {
            Some((base, step_text)) => {
                let step: u32 = step_text
                    .parse()
                    .with_context(|| format!("Bad step in '{entry}'"))?;
                if step == 0 {
                    anyhow::bail!("Step in '{entry}' must be positive");
                }
                (base, step)
            }
            None => (entry, 1),
        };

        let (lo, hi) = if base == "*" {
            (min, max)
        } else if let Some((lo_text, hi_text)) = base.split_once('-') {
            (
                parse_bounded(lo_text, min, max)?,
                parse_bounded(hi_text, min, max)?,
            )
        } else {
            let value = parse_bounded(base, min, max)?;
            if step > 1 {
                (value, max)
            } else {
                (value, value)
            }
        };

        if lo > hi {
            anyhow::bail!("Range '{entry}' runs backwards");
        }

        let mut value = lo;
        while value <= hi {
            mask |= 1 << value;
            value += step;
        }
    }

    if mask == 0 {
        anyhow::bail!("Field '{field}' admits no values");
    }
    Ok(FieldSet { mask })
}

fn parse_bounded(text: &str, min: u32, max: u32) -> Result<u32> {
    let value: u32 = text
        .parse()
        .with_context(|| format!("'{text}' is not a number"))?;
    if value < min || value > max {
        anyhow::bail!("{value} is outside {min}-{max}");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_wildcard() {
        let expr = CronExpression::parse("* * * * *").unwrap();
        let now = Utc::now();
        assert!(expr.matches(&now));
    }

    #[test]
    fn test_parse_daily_midnight() {
        let expr = CronExpression::parse("0 0 * * *").unwrap();
        assert!(expr.matches(&at(2026, 3, 1, 0, 0, 0)));
        assert!(!expr.matches(&at(2026, 3, 1, 0, 1, 0)));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(CronExpression::parse("invalid").is_err());
        assert!(CronExpression::parse("* * *").is_err());
        assert!(CronExpression::parse("60 * * * *").is_err());
        assert!(CronExpression::parse("* * * * * * *").is_err());
        assert!(CronExpression::parse("5-2 * * * *").is_err());
        assert!(CronExpression::parse("*/0 * * * *").is_err());
    }

    #[test]
    fn test_mixed_list_entries() {
        // Lists can combine plain values, ranges, and steps.
        let expr = CronExpression::parse("1,10-12,30/15 * * * *").unwrap();
        for minute in [1, 10, 11, 12, 30, 45] {
            assert!(expr.matches(&at(2026, 5, 4, 9, minute, 0)), "minute {minute}");
        }
        assert!(!expr.matches(&at(2026, 5, 4, 9, 13, 0)));
        assert!(!expr.matches(&at(2026, 5, 4, 9, 29, 0)));
    }

    #[test]
    fn test_range_with_step() {
        let expr = CronExpression::parse("0 9-17/2 * * *").unwrap();
        assert!(expr.matches(&at(2026, 5, 4, 9, 0, 0)));
        assert!(expr.matches(&at(2026, 5, 4, 11, 0, 0)));
        assert!(!expr.matches(&at(2026, 5, 4, 10, 0, 0)));
        assert!(!expr.matches(&at(2026, 5, 4, 18, 0, 0)));
    }

    #[test]
    fn test_next_after_every_minute() {
        let expr = CronExpression::parse("* * * * *").unwrap();
        let next = expr.next_after(&at(2026, 5, 4, 12, 0, 30), false).unwrap();
        assert_eq!(next, at(2026, 5, 4, 12, 1, 0));
    }

    #[test]
    fn test_next_after_exclusive_skips_boundary() {
        let expr = CronExpression::parse("* * * * *").unwrap();
        let boundary = at(2026, 5, 4, 12, 0, 0);
        assert_eq!(
            expr.next_after(&boundary, false).unwrap(),
            at(2026, 5, 4, 12, 1, 0)
        );
        assert_eq!(expr.next_after(&boundary, true).unwrap(), boundary);
    }

    #[test]
    fn test_next_after_steps() {
        let expr = CronExpression::parse("*/15 * * * *").unwrap();
        let next = expr.next_after(&at(2026, 5, 4, 12, 16, 0), false).unwrap();
        assert_eq!(next, at(2026, 5, 4, 12, 30, 0));
    }

    #[test]
    fn test_next_after_hour_rollover() {
        let expr = CronExpression::parse("5 9 * * *").unwrap();
        let next = expr.next_after(&at(2026, 5, 4, 10, 0, 0), false).unwrap();
        assert_eq!(next, at(2026, 5, 5, 9, 5, 0));
    }

    #[test]
    fn test_next_after_weekday_range() {
        // Monday-Friday at 09:00; 2026-05-02 is a Saturday.
        let expr = CronExpression::parse("0 9 * * 1-5").unwrap();
        let next = expr.next_after(&at(2026, 5, 2, 8, 0, 0), false).unwrap();
        assert_eq!(next, at(2026, 5, 4, 9, 0, 0));
    }

    #[test]
    fn test_six_field_seconds() {
        let expr = CronExpression::parse("30 * * * * *").unwrap();
        let next = expr.next_after(&at(2026, 5, 4, 12, 0, 10), false).unwrap();
        assert_eq!(next, at(2026, 5, 4, 12, 0, 30));
        let next = expr.next_after(&at(2026, 5, 4, 12, 0, 30), false).unwrap();
        assert_eq!(next, at(2026, 5, 4, 12, 1, 30));
    }

    #[test]
    fn test_six_field_inclusive_reference() {
        let expr = CronExpression::parse("30 * * * * *").unwrap();
        let tick = at(2026, 5, 4, 12, 0, 30);
        assert_eq!(expr.next_after(&tick, true).unwrap(), tick);
    }

    #[test]
    fn test_impossible_date_yields_none() {
        // February 30th never exists.
        let expr = CronExpression::parse("0 0 30 2 *").unwrap();
        assert!(expr.next_after(&at(2026, 1, 1, 0, 0, 0), false).is_none());
    }
}
