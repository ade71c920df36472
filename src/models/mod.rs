use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order id recorded for simulated fills
pub const DRY_RUN_ORDER_ID: &str = "dry-run";

/// Decimals used for quote currency amounts (USDT)
pub const QUOTE_DECIMALS: u32 = 2;

/// Decimals used for base asset amounts (BTC)
pub const BASE_DECIMALS: u32 = 8;

/// A persisted purchase. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>, // Assigned by the store at write time
    pub usd_amount: f64,
    pub unit_amount: f64,
    pub price: f64, // usd_amount / unit_amount
    pub order_id: String,
    pub dry_run: bool,
}

/// A purchase about to be appended to the ledger (no timestamp yet)
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub usd_amount: f64,
    pub unit_amount: f64,
    pub price: f64,
    pub order_id: String,
    pub dry_run: bool,
}

impl NewTrade {
    /// Build a ledger entry from the filled values reported by the exchange.
    ///
    /// Price is always derived from the fill, never taken from a ticker.
    pub fn from_fill(fill: &BuyFill, dry_run: bool) -> Self {
        let price = if fill.executed_units > 0.0 {
            fill.executed_usd / fill.executed_units
        } else {
            0.0
        };

        Self {
            usd_amount: fill.executed_usd,
            unit_amount: fill.executed_units,
            price,
            order_id: fill.order_id.clone(),
            dry_run,
        }
    }

    pub fn into_trade(self, id: Uuid, timestamp: DateTime<Utc>) -> Trade {
        Trade {
            id,
            timestamp,
            usd_amount: self.usd_amount,
            unit_amount: self.unit_amount,
            price: self.price,
            order_id: self.order_id,
            dry_run: self.dry_run,
        }
    }
}

/// Result of a filled market buy
#[derive(Debug, Clone, PartialEq)]
pub struct BuyFill {
    pub order_id: String,
    pub executed_units: f64,
    pub executed_usd: f64,
    pub executed_price: f64,
}

impl BuyFill {
    /// Both sides of the fill are positive and finite
    pub fn is_filled(&self) -> bool {
        self.executed_units.is_finite()
            && self.executed_usd.is_finite()
            && self.executed_units > 0.0
            && self.executed_usd > 0.0
    }
}

/// Free balances on the exchange account
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub quote_free: f64,
    pub base_free: f64,
}

/// Holding that existed before the bot started buying
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialPortfolio {
    pub unit_amount: f64,
    pub avg_price: f64,
}

impl InitialPortfolio {
    pub fn new(unit_amount: f64, avg_price: f64) -> Self {
        Self {
            unit_amount,
            avg_price,
        }
    }

    pub fn investment(&self) -> f64 {
        self.unit_amount * self.avg_price
    }

    pub fn is_empty(&self) -> bool {
        self.unit_amount <= 0.0
    }
}

/// Round a quote currency amount to cents
pub fn round_quote(amount: f64) -> f64 {
    round_dp(amount, QUOTE_DECIMALS)
}

/// Round a base asset amount to exchange precision
pub fn round_base(units: f64) -> f64 {
    round_dp(units, BASE_DECIMALS)
}

/// Render a quote amount the way the exchange expects it in an order body
pub fn quote_to_string(amount: f64) -> String {
    Decimal::from_f64(amount)
        .map(|d| d.round_dp(QUOTE_DECIMALS).normalize().to_string())
        .unwrap_or_else(|| format!("{:.2}", amount))
}

fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .and_then(|d| d.round_dp(dp).to_f64())
        .unwrap_or(value)
}
