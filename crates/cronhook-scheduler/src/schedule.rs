use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{Result, SchedulerError};
use crate::types::Trigger;

/// Give up searching after this many years without a match (e.g. `0 0 30 2 *`).
const MAX_SEARCH_YEARS: i32 = 5;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Compute the next UTC execution time for `trigger` relative to `from`.
///
/// One-off triggers always return their fire time (even if already past, so
/// a task created late fires on the next poll). Cron triggers return the first
/// occurrence strictly after `from`.
pub fn compute_next_run(trigger: &Trigger, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match trigger {
        Trigger::OneOff { fire_at } => Ok(Some(*fire_at)),
        Trigger::Cron { expression } => Ok(CronSchedule::parse(expression)?.next_after(from)),
    }
}

/// A parsed standard 5-field cron expression: `MIN HOUR DOM MON DOW`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    /// True when DOM was `*`; controls the DOM/DOW OR rule.
    dom_any: bool,
    dow_any: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let expr = expression.trim();
        let expanded = match expr {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => {
                return Err(invalid(expression, "unknown descriptor"));
            }
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                expression,
                "expected 5 fields: MIN HOUR DOM MON DOW",
            ));
        }

        let minutes = parse_field(fields[0], 0, 59, &[])
            .map_err(|e| invalid(expression, &format!("minute: {e}")))?;
        let hours = parse_field(fields[1], 0, 23, &[])
            .map_err(|e| invalid(expression, &format!("hour: {e}")))?;
        let days_of_month = parse_field(fields[2], 1, 31, &[])
            .map_err(|e| invalid(expression, &format!("day of month: {e}")))?;
        let months = parse_field(fields[3], 1, 12, &MONTH_NAMES)
            .map_err(|e| invalid(expression, &format!("month: {e}")))?;
        // 7 is accepted as an alias for Sunday.
        let mut days_of_week = parse_field(fields[4], 0, 7, &WEEKDAY_NAMES)
            .map_err(|e| invalid(expression, &format!("day of week: {e}")))?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_any: fields[2] == "*",
            dow_any: fields[4] == "*",
        })
    }

    /// First matching minute strictly after `after`, or `None` if the
    /// expression never matches within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = start.year() + MAX_SEARCH_YEARS;
        let mut t = start;

        while t.year() <= horizon {
            if !bit(self.months, t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t) {
                t = start_of_day(t)? + Duration::days(1);
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, t.day());
        let dow = bit(self.days_of_week, t.weekday().num_days_from_sunday());
        match (self.dom_any, self.dow_any) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            // Both restricted: either may match (standard cron semantics).
            (false, false) => dom || dow,
        }
    }
}

fn bit(set: u64, value: u32) -> bool {
    set & (1u64 << value) != 0
}

fn start_of_day(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
        .single()
}

fn first_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Parse one cron field into a bit set of allowed values.
///
/// Supports `*`, `N`, `A-B`, `*/S`, `A-B/S`, `N/S` and comma-separated lists.
/// `names` maps symbolic values (e.g. `JAN`, `MON`) onto `min..`.
fn parse_field(field: &str, min: u32, max: u32, names: &[&str]) -> std::result::Result<u64, String> {
    let mut set = 0u64;
    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("empty list element in '{field}'"));
        }
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}'"))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, names)?, parse_value(b, min, names)?)
        } else {
            let v = parse_value(range, min, names)?;
            // `N/S` means "from N to max every S".
            (v, if step.is_some() { max } else { v })
        };

        if lo < min || hi > max || lo > hi {
            return Err(format!("'{part}' is outside {min}-{max}"));
        }

        let step = step.unwrap_or(1);
        let mut v = lo;
        while v <= hi {
            set |= 1u64 << v;
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }
    Ok(set)
}

fn parse_value(raw: &str, min: u32, names: &[&str]) -> std::result::Result<u32, String> {
    if let Ok(n) = raw.parse::<u32>() {
        return Ok(n);
    }
    let upper = raw.to_ascii_uppercase();
    names
        .iter()
        .position(|name| *name == upper)
        .map(|idx| idx as u32 + min)
        .ok_or_else(|| format!("invalid value '{raw}'"))
}

fn invalid(expression: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidSchedule(format!("'{expression}': {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn next(expr: &str, after: DateTime<Utc>) -> DateTime<Utc> {
        CronSchedule::parse(expr).unwrap().next_after(after).unwrap()
    }

    #[test]
    fn every_minute_goes_to_next_boundary() {
        assert_eq!(next("* * * * *", at(2026, 2, 22, 10, 30, 15)), at(2026, 2, 22, 10, 31, 0));
        // Exactly on a boundary still moves strictly forward.
        assert_eq!(next("* * * * *", at(2026, 2, 22, 10, 30, 0)), at(2026, 2, 22, 10, 31, 0));
    }

    #[test]
    fn every_hour() {
        assert_eq!(next("0 * * * *", at(2026, 2, 22, 10, 30, 0)), at(2026, 2, 22, 11, 0, 0));
        assert_eq!(next("@hourly", at(2026, 2, 22, 23, 59, 0)), at(2026, 2, 23, 0, 0, 0));
    }

    #[test]
    fn daily_at_specific_time() {
        assert_eq!(next("0 8 * * *", at(2026, 2, 22, 7, 0, 0)), at(2026, 2, 22, 8, 0, 0));
        assert_eq!(next("0 8 * * *", at(2026, 2, 22, 8, 0, 0)), at(2026, 2, 23, 8, 0, 0));
    }

    #[test]
    fn steps_ranges_and_lists() {
        assert_eq!(next("*/15 * * * *", at(2026, 2, 22, 10, 2, 0)), at(2026, 2, 22, 10, 15, 0));
        assert_eq!(next("0 9-17/4 * * *", at(2026, 2, 22, 10, 0, 0)), at(2026, 2, 22, 13, 0, 0));
        assert_eq!(next("5,35 * * * *", at(2026, 2, 22, 10, 6, 0)), at(2026, 2, 22, 10, 35, 0));
    }

    #[test]
    fn weekday_names_and_sunday_alias() {
        // 2026-02-22 is a Sunday.
        assert_eq!(next("0 9 * * MON", at(2026, 2, 22, 12, 0, 0)), at(2026, 2, 23, 9, 0, 0));
        assert_eq!(next("0 9 * * 7", at(2026, 2, 23, 12, 0, 0)), at(2026, 3, 1, 9, 0, 0));
        assert_eq!(next("0 9 * * mon-fri", at(2026, 2, 27, 10, 0, 0)), at(2026, 3, 2, 9, 0, 0));
    }

    #[test]
    fn month_rollover_and_year_end() {
        assert_eq!(next("0 0 1 * *", at(2026, 12, 15, 0, 0, 0)), at(2027, 1, 1, 0, 0, 0));
        assert_eq!(next("0 0 1 JAN *", at(2026, 3, 1, 0, 0, 0)), at(2027, 1, 1, 0, 0, 0));
    }

    #[test]
    fn dom_and_dow_are_ored_when_both_restricted() {
        // The 15th or any Monday, whichever comes first.
        assert_eq!(next("0 0 15 * MON", at(2026, 2, 10, 0, 0, 0)), at(2026, 2, 15, 0, 0, 0));
        assert_eq!(next("0 0 15 * MON", at(2026, 2, 15, 0, 0, 0)), at(2026, 2, 16, 0, 0, 0));
    }

    #[test]
    fn leap_day_is_found_and_impossible_date_gives_none() {
        assert_eq!(next("0 0 29 2 *", at(2026, 3, 1, 0, 0, 0)), at(2028, 2, 29, 0, 0, 0));
        let never = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert!(never.next_after(at(2026, 1, 1, 0, 0, 0)).is_none());
    }

    #[test]
    fn invalid_expressions_are_rejected() {
        for expr in ["bad", "* * * *", "60 * * * *", "* 24 * * *", "*/0 * * * *", "@often", "1,,2 * * * *", "5-1 * * * *"] {
            assert!(
                matches!(CronSchedule::parse(expr), Err(SchedulerError::InvalidSchedule(_))),
                "{expr} should be rejected"
            );
        }
    }

    #[test]
    fn compute_next_run_by_trigger_kind() {
        let now = at(2026, 2, 22, 10, 30, 0);
        let fire_at = at(2026, 2, 22, 9, 0, 0);
        assert_eq!(
            compute_next_run(&Trigger::OneOff { fire_at }, now).unwrap(),
            Some(fire_at)
        );
        assert_eq!(
            compute_next_run(&Trigger::Cron { expression: "*/10 * * * *".into() }, now).unwrap(),
            Some(at(2026, 2, 22, 10, 40, 0))
        );
        assert!(compute_next_run(&Trigger::Cron { expression: "nope".into() }, now).is_err());
    }

    #[test]
    fn huge_step_selects_only_the_range_start() {
        let schedule = CronSchedule::parse("1-5/4294967295 * * * *").unwrap();
        assert_eq!(schedule.minutes, 1u64 << 1);
        assert_eq!(
            schedule.next_after(at(2026, 2, 22, 10, 30, 0)),
            Some(at(2026, 2, 22, 11, 1, 0))
        );
        assert!(CronSchedule::parse("*/4294967296 * * * *").is_err());
    }
}
