//! Outbound notifications.
//!
//! Every call is best effort from the engine's point of view: failures are
//! logged by the caller and never change trade or accounting state.

pub mod commands;
pub mod format;
pub mod log;
pub mod telegram;

pub use commands::CommandPoller;
pub use log::LogNotifier;
pub use telegram::TelegramNotifier;

use crate::models::{Balance, InitialPortfolio, Trade};
use crate::portfolio::{PortfolioStats, Runway};
use crate::scheduler::{Cadence, Eta};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Portfolio state attached to every status message.
/// Price and balance are missing when the exchange could not be reached.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub stats: PortfolioStats,
    pub initial: InitialPortfolio,
    pub price: Option<f64>,
    pub balance: Option<Balance>,
    pub runway: Option<Runway>,
    pub cadence: Cadence,
    pub amount_usd: f64,
    pub next_purchase: Eta,
    pub taken_at: DateTime<Utc>,
}

/// A purchase that was just recorded
#[derive(Debug, Clone, PartialEq)]
pub struct TradeNotification {
    pub trade: Trade,
    pub snapshot: PortfolioSnapshot,
}

/// Periodic summary over `[window_start, window_end)`
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub trades: Vec<Trade>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Trades recorded after the previous summary was sent
    pub since_last_report: usize,
    pub snapshot: PortfolioSnapshot,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_trade(&self, notification: &TradeNotification) -> Result<()>;

    async fn notify_insufficient_balance(&self, balance: f64, required: f64) -> Result<()>;

    async fn notify_summary(&self, report: &SummaryReport) -> Result<()>;
}
