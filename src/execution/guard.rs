use crate::clock::Clock;
use crate::db::TradeStore;
use crate::scheduler::Cadence;
use crate::Result;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;

/// Half-width of the window around a daily target time
pub const GUARD_WINDOW_MINUTES: i64 = 5;

/// Detects a purchase cycle re-firing for a slot that already has a trade
pub struct DuplicateGuard {
    store: Arc<dyn TradeStore>,
    clock: Arc<dyn Clock>,
}

impl DuplicateGuard {
    pub fn new(store: Arc<dyn TradeStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// `[target - 5m, target + 5m]` for today's `hour:minute` UTC
    pub fn window_for(now: DateTime<Utc>, hour: u32, minute: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
        let target = now.date_naive().and_time(time).and_utc();
        let half = Duration::minutes(GUARD_WINDOW_MINUTES);
        (target - half, target + half)
    }

    /// Whether today's `hour:minute` slot already has a trade.
    ///
    /// Always false until the window has closed, so the guard never blocks the
    /// trade of the slot it is protecting.
    pub async fn is_duplicate(&self, hour: u32, minute: u32) -> Result<bool> {
        let now = self.clock.now();
        let (start, end) = Self::window_for(now, hour, minute);

        if now < end {
            return Ok(false);
        }

        self.store.trade_exists_in_range(start, end).await
    }

    /// Whether the current interval period already has a trade
    pub async fn is_duplicate_in_period(&self, cadence: &Cadence) -> Result<bool> {
        let now = self.clock.now();
        let period_start = cadence.slot_at_or_before(now);
        self.store.trade_exists_in_range(period_start, now).await
    }

    /// Cadence-aware check used by the engine. Interval cadences are only
    /// guarded when `interval_guard` is enabled.
    pub async fn check(&self, cadence: &Cadence, interval_guard: bool) -> Result<bool> {
        match cadence.time_of_day() {
            Some((hour, minute)) => self.is_duplicate(hour, minute).await,
            None if interval_guard => self.is_duplicate_in_period(cadence).await,
            None => Ok(false),
        }
    }
}
