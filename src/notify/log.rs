use super::{Notifier, SummaryReport, TradeNotification};
use crate::Result;
use async_trait::async_trait;

/// Writes notifications to the log. Used when no chat transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_trade(&self, notification: &TradeNotification) -> Result<()> {
        let trade = &notification.trade;
        let stats = &notification.snapshot.stats;
        tracing::info!(
            order_id = %trade.order_id,
            "📬 Purchase: {:.8} units for ${:.2} at ${:.2} | {} trades, {:.8} units, mean ${:.2} | next in {}",
            trade.unit_amount,
            trade.usd_amount,
            trade.price,
            stats.num_trades,
            stats.total_units,
            stats.mean_price,
            notification.snapshot.next_purchase
        );
        Ok(())
    }

    async fn notify_insufficient_balance(&self, balance: f64, required: f64) -> Result<()> {
        tracing::warn!(
            "📬 Insufficient balance: ${:.2} available, ${:.2} required",
            balance,
            required
        );
        Ok(())
    }

    async fn notify_summary(&self, report: &SummaryReport) -> Result<()> {
        let spent: f64 = report.trades.iter().map(|t| t.usd_amount).sum();
        tracing::info!(
            "📬 Summary {} to {}: {} purchase(s), ${:.2} spent, {} since last summary",
            report.window_start,
            report.window_end,
            report.trades.len(),
            spent,
            report.since_last_report
        );
        Ok(())
    }
}
