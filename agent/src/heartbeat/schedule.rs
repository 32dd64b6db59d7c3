//! Job schedules
//!
//! Either a five-field cron expression (`min hour dom month dow`, UTC) supporting `*`,
//! lists, ranges and steps, or a fixed interval written `@every <n>{s,m,h}`.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Timelike, Utc};

use crate::errors::AgentError;

/// Days searched for the next cron match before giving up (covers leap years)
const MAX_SEARCH_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
    Cron(CronSchedule),
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, AgentError> {
        let expr = expr.trim();
        let invalid = |reason: &str| AgentError::InvalidSchedule {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        if let Some(interval) = expr.strip_prefix("@every") {
            return parse_interval(interval.trim()).map(Schedule::Every).map_err(|r| invalid(&r));
        }

        let expanded = match expr {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            other => other,
        };
        CronSchedule::parse(expanded).map(Schedule::Cron).map_err(|r| invalid(&r))
    }

    /// First firing strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Every(interval) => ChronoDuration::from_std(*interval)
                .ok()
                .and_then(|d| after.checked_add_signed(d)),
            Schedule::Cron(cron) => cron.next_after(after),
        }
    }

    /// Time to wait from `now` until the next firing
    pub fn delay_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Schedule::Every(interval) => Some(*interval),
            Schedule::Cron(cron) => cron
                .next_after(now)
                .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO)),
        }
    }
}

impl FromStr for Schedule {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Schedule::parse(s)
    }
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let (number, multiplier) = if let Some(n) = raw.strip_suffix('s') {
        (n, 1u64)
    } else if let Some(n) = raw.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = raw.strip_suffix('h') {
        (n, 3600)
    } else {
        return Err(format!("unknown interval unit in {:?}, expected <n>s, <n>m or <n>h", raw));
    };
    let n: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid interval {:?}", raw))?;
    if n == 0 {
        return Err("interval must be positive".to_string());
    }
    let secs = n
        .checked_mul(multiplier)
        .ok_or_else(|| format!("interval {:?} is too large", raw))?;
    Ok(Duration::from_secs(secs))
}

/// Parsed five-field cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!("expected 5 fields, got {}", fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], 0, 7)?;
        // 7 is another name for Sunday
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
            days_of_month: parse_field(fields[2], 1, 31)?,
            months: parse_field(fields[3], 1, 12)?,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    fn day_matches(&self, day: u32, weekday: u32) -> bool {
        let dom = self.days_of_month.contains(&day);
        let dow = self.days_of_week.contains(&weekday);
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + ChronoDuration::minutes(1);
        let mut date = start.date_naive();
        let mut from_hour = start.hour();
        let mut from_minute = start.minute();

        for _ in 0..MAX_SEARCH_DAYS {
            if self.months.contains(&date.month())
                && self.day_matches(date.day(), date.weekday().num_days_from_sunday())
            {
                for &hour in self.hours.range(from_hour..) {
                    let first_minute = if hour == from_hour { from_minute } else { 0 };
                    if let Some(&minute) = self.minutes.range(first_minute..).next() {
                        let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
                        return Some(date.and_time(time).and_utc());
                    }
                }
            }
            date = date.succ_opt()?;
            from_hour = 0;
            from_minute = 0;
        }
        None
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>, String> {
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("invalid step in {:?}", part))?;
                if step == 0 {
                    return Err(format!("zero step in {:?}", part));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, min, max)?, parse_value(hi, min, max)?)
        } else {
            let value = parse_value(range, min, max)?;
            // `a/step` runs to the end of the field
            if part.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };

        if lo > hi {
            return Err(format!("descending range {:?}", part));
        }
        values.extend((lo..=hi).step_by(step as usize));
    }

    Ok(values)
}

fn parse_value(raw: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = raw.parse().map_err(|_| format!("invalid value {:?}", raw))?;
    if value < min || value > max {
        return Err(format!("{} out of range {}-{}", value, min, max));
    }
    Ok(value)
}
