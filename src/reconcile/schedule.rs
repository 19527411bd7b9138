//! Cron schedule for reconciliation ticks.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

/// Parsed reconciliation schedule.
///
/// Accepts classic 5-field crontab expressions (minute first, weekdays 0-7
/// with Sunday as 0 or 7) as well as the 6/7-field form with a leading
/// seconds field, which uses the `cron` crate's own weekday numbering.
#[derive(Debug, Clone)]
pub struct ReconcileSchedule {
    expr: String,
    schedule: CronSchedule,
}

impl ReconcileSchedule {
    pub fn parse(expr: &str) -> Result<Self, cron::error::Error> {
        let trimmed = expr.trim();
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let normalized = if fields.len() == 5 {
            format!("0 {} {}", fields[..4].join(" "), crontab_weekdays(fields[4]))
        } else {
            trimmed.to_string()
        };
        let schedule = CronSchedule::from_str(&normalized)?;
        Ok(Self {
            expr: trimmed.to_string(),
            schedule,
        })
    }

    /// The expression as configured.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First tick strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// The next `count` ticks after `from`.
    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }
}

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

fn weekday_name(token: &str) -> Option<&'static str> {
    token.parse::<usize>().ok().and_then(|n| WEEKDAYS.get(n).copied())
}

/// Rewrite a crontab day-of-week field (0-7, Sunday = 0 or 7) with day names,
/// which the `cron` crate reads unambiguously. Anything that is not a plain
/// number or numeric range is passed through for `cron` to judge.
fn crontab_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let with_step = |b: String| match step {
                Some(step) => format!("{b}/{step}"),
                None => b,
            };

            if let Some(day) = weekday_name(base) {
                return with_step(day.to_string());
            }
            let Some((start, end)) = base.split_once('-') else {
                return item.to_string();
            };
            let (Some(first), Some(last)) = (weekday_name(start), weekday_name(end)) else {
                return item.to_string();
            };
            match (start.parse::<usize>(), end.parse::<usize>()) {
                (Ok(a), Ok(b)) if a == b => with_step(first.to_string()),
                (Ok(0), Ok(7)) => with_step("SUN-SAT".to_string()),
                // `n-7` ends on Sunday: split it so the range stays ascending.
                (Ok(_), Ok(7)) if step.is_none() => format!("{first}-SAT,SUN"),
                (Ok(_), Ok(7)) => with_step(format!("{first}-SAT")),
                _ => with_step(format!("{first}-{last}")),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
