use crate::models::{InitialPortfolio, Trade};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Blended statistics over the initial holding plus every recorded trade.
/// Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioStats {
    pub num_trades: usize,
    pub total_spent_usd: f64,
    pub total_units: f64,
    /// total_spent_usd / total_units, 0 when nothing is held
    pub mean_price: f64,
    pub first_trade_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl PortfolioStats {
    /// No trades and no initial holding
    pub fn is_empty(&self) -> bool {
        self.num_trades == 0 && self.total_units <= 0.0
    }

    pub fn current_value(&self, current_price: f64) -> f64 {
        self.total_units * current_price
    }
}

/// One contribution to the blended position
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Slice {
    pub units: f64,
    pub spent_usd: f64,
    pub avg_price: f64,
}

impl Slice {
    fn new(units: f64, spent_usd: f64) -> Self {
        let avg_price = if units > 0.0 { spent_usd / units } else { 0.0 };
        Self {
            units,
            spent_usd,
            avg_price,
        }
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        if self.units <= 0.0 {
            return 0.0;
        }
        (current_price - self.avg_price) * self.units
    }
}

/// Split of the blended position into the initial holding and what the
/// scheduled purchases added
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlendBreakdown {
    pub initial: Slice,
    pub accumulated: Slice,
}

/// Fold the trade log and the initial holding into blended statistics.
///
/// Sum based, so the order of `trades` does not matter.
pub fn compute_stats(trades: &[Trade], initial: &InitialPortfolio) -> PortfolioStats {
    let traded_usd: f64 = trades.iter().map(|t| t.usd_amount).sum();
    let traded_units: f64 = trades.iter().map(|t| t.unit_amount).sum();

    let total_spent_usd = traded_usd + initial.investment();
    let total_units = traded_units + initial.unit_amount;
    let mean_price = if total_units > 0.0 {
        total_spent_usd / total_units
    } else {
        0.0
    };

    PortfolioStats {
        num_trades: trades.len(),
        total_spent_usd,
        total_units,
        mean_price,
        first_trade_at: trades.iter().map(|t| t.timestamp).min(),
        last_trade_at: trades.iter().map(|t| t.timestamp).max(),
    }
}

/// Paper profit of the whole position at `current_price`
pub fn unrealized_pnl(stats: &PortfolioStats, current_price: f64) -> f64 {
    if stats.total_units <= 0.0 {
        return 0.0;
    }
    (current_price - stats.mean_price) * stats.total_units
}

/// Percentage change of `current_price` over the mean price
pub fn pnl_percent(stats: &PortfolioStats, current_price: f64) -> f64 {
    if stats.mean_price <= 0.0 {
        return 0.0;
    }
    (current_price / stats.mean_price - 1.0) * 100.0
}

/// Split `stats` into the initial slice and the accumulated-by-trading slice
pub fn blend_breakdown(stats: &PortfolioStats, initial: &InitialPortfolio) -> BlendBreakdown {
    let initial_slice = Slice::new(initial.unit_amount, initial.investment());
    let accumulated = Slice::new(
        (stats.total_units - initial.unit_amount).max(0.0),
        (stats.total_spent_usd - initial.investment()).max(0.0),
    );

    BlendBreakdown {
        initial: initial_slice,
        accumulated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn trade(minutes: i64, usd: f64, units: f64) -> Trade {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        Trade {
            id: Uuid::new_v4(),
            timestamp: base + Duration::minutes(minutes),
            usd_amount: usd,
            unit_amount: units,
            price: usd / units,
            order_id: format!("order-{}", minutes),
            dry_run: false,
        }
    }

    /// Deterministic pseudo-random trade history
    fn history(seed: u64, len: usize) -> Vec<Trade> {
        let mut state = seed;
        (0..len)
            .map(|i| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let price = 15_000.0 + (state >> 33) as f64 % 60_000.0;
                let usd = 10.0 + (state >> 40) as f64 % 490.0;
                trade(i as i64 * 60, usd, usd / price)
            })
            .collect()
    }

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * b.abs().max(1.0)
    }

    #[test]
    fn test_blended_scenario() {
        let initial = InitialPortfolio::new(0.1, 20000.0);
        let trades = vec![trade(0, 100.0, 0.002)];

        let stats = compute_stats(&trades, &initial);
        assert_eq!(stats.num_trades, 1);
        assert!(approx(stats.total_units, 0.102, 1e-12));
        assert!(approx(stats.total_spent_usd, 2100.0, 1e-12));
        assert!((stats.mean_price - 20588.24).abs() < 0.01);
    }

    #[test]
    fn test_mean_price_times_units_is_total_spent() {
        for seed in 1..50 {
            let initial = InitialPortfolio::new((seed % 3) as f64 * 0.05, 25_000.0);
            let stats = compute_stats(&history(seed, seed as usize), &initial);

            if stats.total_units > 0.0 {
                assert!(approx(stats.mean_price * stats.total_units, stats.total_spent_usd, 1e-9));
                assert!(stats.mean_price > 0.0);
            } else {
                assert_eq!(stats.mean_price, 0.0);
            }
        }
    }

    #[test]
    fn test_order_independent() {
        let initial = InitialPortfolio::new(0.25, 31_000.0);
        let trades = history(7, 40);
        let stats = compute_stats(&trades, &initial);

        let mut reversed = trades.clone();
        reversed.reverse();
        let mut rotated = trades.clone();
        rotated.rotate_left(13);

        for shuffled in [reversed, rotated] {
            let other = compute_stats(&shuffled, &initial);
            assert_eq!(other.num_trades, stats.num_trades);
            assert!(approx(other.total_units, stats.total_units, 1e-12));
            assert!(approx(other.total_spent_usd, stats.total_spent_usd, 1e-12));
            assert!(approx(other.mean_price, stats.mean_price, 1e-12));
            assert_eq!(other.first_trade_at, stats.first_trade_at);
            assert_eq!(other.last_trade_at, stats.last_trade_at);
        }
    }

    #[test]
    fn test_empty_state() {
        let stats = compute_stats(&[], &InitialPortfolio::default());
        assert!(stats.is_empty());
        assert_eq!(stats.mean_price, 0.0);
        assert_eq!(stats.first_trade_at, None);
        assert_eq!(unrealized_pnl(&stats, 50_000.0), 0.0);
        assert_eq!(pnl_percent(&stats, 50_000.0), 0.0);
    }

    #[test]
    fn test_initial_only_is_not_empty() {
        let stats = compute_stats(&[], &InitialPortfolio::new(0.5, 30_000.0));
        assert!(!stats.is_empty());
        assert_eq!(stats.mean_price, 30_000.0);
        assert!(approx(unrealized_pnl(&stats, 40_000.0), 5_000.0, 1e-12));
    }

    #[test]
    fn test_unrealized_pnl_and_percent() {
        let trades = vec![trade(0, 100.0, 0.002), trade(60, 100.0, 0.0025)];
        let stats = compute_stats(&trades, &InitialPortfolio::default());
        // 200 USD for 0.0045 units
        let pnl = unrealized_pnl(&stats, 50_000.0);
        assert!(approx(pnl, 0.0045 * 50_000.0 - 200.0, 1e-9));
        assert!(approx(pnl_percent(&stats, stats.mean_price * 1.1), 10.0, 1e-9));
    }

    #[test]
    fn test_blend_breakdown_slices_sum_to_total() {
        let initial = InitialPortfolio::new(0.1, 20000.0);
        let trades = vec![trade(0, 100.0, 0.002), trade(60, 150.0, 0.003)];
        let stats = compute_stats(&trades, &initial);

        let breakdown = blend_breakdown(&stats, &initial);
        assert!(approx(breakdown.initial.units, 0.1, 1e-12));
        assert!(approx(breakdown.initial.spent_usd, 2000.0, 1e-12));
        assert!(approx(breakdown.initial.avg_price, 20000.0, 1e-12));
        assert!(approx(breakdown.accumulated.units, 0.005, 1e-9));
        assert!(approx(breakdown.accumulated.spent_usd, 250.0, 1e-9));
        assert!(approx(breakdown.accumulated.avg_price, 50_000.0, 1e-6));
        assert!(approx(
            breakdown.initial.units + breakdown.accumulated.units,
            stats.total_units,
            1e-12
        ));
    }

    #[test]
    fn test_breakdown_without_trades() {
        let initial = InitialPortfolio::new(0.1, 20000.0);
        let stats = compute_stats(&[], &initial);
        let breakdown = blend_breakdown(&stats, &initial);
        assert_eq!(breakdown.accumulated.units, 0.0);
        assert_eq!(breakdown.accumulated.avg_price, 0.0);
        assert_eq!(breakdown.accumulated.unrealized_pnl(60_000.0), 0.0);
    }
}
