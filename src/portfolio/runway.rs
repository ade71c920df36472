use crate::scheduler::Cadence;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// How long the free quote balance keeps the purchases going
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Runway {
    /// Purchases the balance still covers
    pub periods: u64,
    /// Whole days those purchases span
    pub days: u64,
}

impl Runway {
    /// When the last covered purchase would fire, counting from `now`.
    /// `None` when that date is past what chrono can represent.
    pub fn ends_at(&self, now: DateTime<Utc>, cadence: &Cadence) -> Option<DateTime<Utc>> {
        let periods = i32::try_from(self.periods).ok()?;
        let span = cadence.period().checked_mul(periods)?;
        now.checked_add_signed(span)
    }
}

pub fn runway(quote_balance: f64, amount: f64, cadence: &Cadence) -> Runway {
    if amount <= 0.0 || quote_balance <= 0.0 || !quote_balance.is_finite() {
        return Runway { periods: 0, days: 0 };
    }

    let periods = (quote_balance / amount).floor() as u64;
    let per_day = (Duration::days(1).num_seconds() / cadence.period().num_seconds()) as u64;

    Runway {
        periods,
        days: periods / per_day.max(1),
    }
}
