use crate::error::DcaError;
use crate::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Unit of a fixed-interval cadence. Slots are anchored at the top of the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Hour,
    Minute,
}

/// When a job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    /// Once a day at HH:MM UTC
    DailyAt { hour: u32, minute: u32 },
    /// Every hour at :00, or every minute at :00 seconds
    Every(IntervalUnit),
}

impl Cadence {
    pub fn daily_at(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(DcaError::Config(format!(
                "invalid time of day {:02}:{:02}",
                hour, minute
            )));
        }
        Ok(Cadence::DailyAt { hour, minute })
    }

    pub fn hourly() -> Self {
        Cadence::Every(IntervalUnit::Hour)
    }

    pub fn every_minute() -> Self {
        Cadence::Every(IntervalUnit::Minute)
    }

    /// Length of one period
    pub fn period(&self) -> Duration {
        match self {
            Cadence::DailyAt { .. } => Duration::days(1),
            Cadence::Every(IntervalUnit::Hour) => Duration::hours(1),
            Cadence::Every(IntervalUnit::Minute) => Duration::minutes(1),
        }
    }

    /// The configured time of day, for time-of-day cadences only
    pub fn time_of_day(&self) -> Option<(u32, u32)> {
        match self {
            Cadence::DailyAt { hour, minute } => Some((*hour, *minute)),
            Cadence::Every(_) => None,
        }
    }

    /// Most recent slot at or before `now`
    pub fn slot_at_or_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::DailyAt { hour, minute } => {
                let target = start_of_day(now)
                    + Duration::hours(*hour as i64)
                    + Duration::minutes(*minute as i64);
                if target <= now {
                    target
                } else {
                    target - Duration::days(1)
                }
            }
            Cadence::Every(IntervalUnit::Hour) => {
                truncate_subsecond(now)
                    - Duration::minutes(now.minute() as i64)
                    - Duration::seconds(now.second() as i64)
            }
            Cadence::Every(IntervalUnit::Minute) => {
                truncate_subsecond(now) - Duration::seconds(now.second() as i64)
            }
        }
    }

    /// First slot strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.slot_at_or_before(now) + self.period()
    }

    /// Display-only estimate used when no next fire time is known.
    /// Always one full period, never less.
    pub fn fallback_eta(&self) -> Eta {
        match self {
            Cadence::DailyAt { .. } => Eta::new(23, 59),
            Cadence::Every(IntervalUnit::Hour) => Eta::new(0, 59),
            Cadence::Every(IntervalUnit::Minute) => Eta::new(0, 1),
        }
    }

    /// Singular name of the period ("day", "hour", "minute")
    pub fn unit_name(&self) -> &'static str {
        match self {
            Cadence::DailyAt { .. } => "day",
            Cadence::Every(IntervalUnit::Hour) => "hour",
            Cadence::Every(IntervalUnit::Minute) => "minute",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::DailyAt { hour, minute } => write!(f, "daily@{:02}:{:02}", hour, minute),
            Cadence::Every(IntervalUnit::Hour) => write!(f, "hourly"),
            Cadence::Every(IntervalUnit::Minute) => write!(f, "every-minute"),
        }
    }
}

impl FromStr for Cadence {
    type Err = DcaError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "hourly" => Ok(Cadence::hourly()),
            "every-minute" => Ok(Cadence::every_minute()),
            _ => match s.strip_prefix("daily@") {
                Some(time) => {
                    let (hour, minute) = parse_time_of_day(time)?;
                    Cadence::daily_at(hour, minute)
                }
                None => Err(DcaError::Config(format!(
                    "unsupported cadence '{}' (expected daily@HH:MM, hourly or every-minute)",
                    s
                ))),
            },
        }
    }
}

/// Parse `HH:MM` (24h, UTC)
pub fn parse_time_of_day(s: &str) -> Result<(u32, u32)> {
    let invalid = || DcaError::Config(format!("invalid time '{}' (expected HH:MM)", s));

    let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;

    if hour > 23 || minute > 59 {
        return Err(invalid());
    }

    Ok((hour, minute))
}

/// Hours and minutes until a job fires, rounded up to the minute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Eta {
    pub hours: u32,
    pub minutes: u32,
}

impl Eta {
    pub fn new(hours: u32, minutes: u32) -> Self {
        Self { hours, minutes }
    }

    /// Convert a remaining duration. Returns None for negative durations.
    ///
    /// Partial minutes round up so the estimate never suggests a trade sooner
    /// than it will happen.
    pub fn from_duration(remaining: Duration) -> Option<Self> {
        let secs = remaining.num_seconds();
        if secs < 0 {
            return None;
        }
        let total_minutes = (secs + 59) / 60;
        Some(Self {
            hours: (total_minutes / 60) as u32,
            minutes: (total_minutes % 60) as u32,
        })
    }

    pub fn as_tuple(&self) -> (u32, u32) {
        (self.hours, self.minutes)
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h{}m", self.hours, self.minutes)
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_subsecond(now) - Duration::seconds(now.num_seconds_from_midnight() as i64)
}

fn truncate_subsecond(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::nanoseconds(now.nanosecond() as i64)
}
