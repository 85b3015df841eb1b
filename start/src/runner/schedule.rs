//! Schedule expressions and the ticker that drives scheduled runners.

use chrono::{DateTime, Local};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// A parsed schedule.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Wall-clock schedule in cron syntax; fires when any of them matches
    Cron(Vec<cron::Schedule>),
    /// Fixed interval, first tick one interval after start
    Every(Duration),
}

impl Schedule {
    /// Parse a schedule expression.
    ///
    /// Accepts standard 5-field cron syntax (day of week 0-7, Sunday being
    /// 0 or 7), 6/7-field cron syntax with seconds, `@hourly`-style
    /// descriptors, and `@every <duration>` such as `@every 10s`.
    ///
    /// In 5-field syntax a day matches when either the day of month or the
    /// day of week matches, if both are restricted.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let expr = expr.trim();

        if let Some(rest) = expr.strip_prefix("@every") {
            let interval = humantime::parse_duration(rest.trim()).map_err(|e| e.to_string())?;
            if interval.is_zero() {
                return Err("interval must be positive".to_string());
            }
            return Ok(Schedule::Every(interval));
        }

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let lines = match fields.as_slice() {
            [minute, hour, dom, month, dow] => {
                let dow = standard_weekdays(dow);
                let line = |dom: &str, dow: &str| {
                    format!("0 {} {} {} {} {}", minute, hour, dom, month, dow)
                };
                if is_restricted(dom) && is_restricted(&dow) {
                    vec![line(dom, "*"), line("*", &dow)]
                } else {
                    vec![line(dom, &dow)]
                }
            }
            _ => vec![expr.to_string()],
        };

        lines
            .iter()
            .map(|line| cron::Schedule::from_str(line))
            .collect::<Result<Vec<_>, _>>()
            .map(Schedule::Cron)
            .map_err(|e| e.to_string())
    }

    /// First tick strictly after `from`.
    pub fn next_after(&self, from: &DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Schedule::Cron(schedules) => schedules
                .iter()
                .filter_map(|schedule| schedule.after(from).next())
                .min(),
            Schedule::Every(period) => chrono::Duration::from_std(*period)
                .ok()
                .and_then(|period| from.checked_add_signed(period)),
        }
    }

    /// Start ticking from now.
    pub fn ticker(&self) -> Ticker {
        let every = match self {
            Schedule::Every(period) => {
                let mut interval = interval_at(Instant::now() + *period, *period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(interval)
            }
            Schedule::Cron(_) => None,
        };
        Ticker {
            schedule: self.clone(),
            every,
            last: None,
        }
    }
}

/// Whether a day field limits the days, `*` and `?` (stepped or not) do not.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field.starts_with('?'))
}

/// Map numeric weekdays of standard cron (0-7, Sunday first) to names,
/// which the `cron` crate reads unambiguously.
fn standard_weekdays(field: &str) -> String {
    const NAMES: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

    let map = |s: &str| -> String {
        match s.parse::<usize>() {
            Ok(n) if n < NAMES.len() => NAMES[n].to_string(),
            _ => s.to_string(),
        }
    };

    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let mut out = range.split('-').map(map).collect::<Vec<_>>().join("-");
            if let Some(step) = step {
                out.push('/');
                out.push_str(step);
            }
            out
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Yields once per matching tick of a schedule.
#[derive(Debug)]
pub struct Ticker {
    schedule: Schedule,
    every: Option<Interval>,
    last: Option<DateTime<Local>>,
}

impl Ticker {
    /// Wait for the next tick. Cancel-safe.
    pub async fn tick(&mut self) {
        if let Some(ref mut interval) = self.every {
            interval.tick().await;
            return;
        }

        let now = Local::now();
        // never fire the same wall-clock time twice
        let from = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        let Some(next) = self.schedule.next_after(&from) else {
            // schedule has no future occurrence
            std::future::pending::<()>().await;
            return;
        };

        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        self.last = Some(next);
    }
}
