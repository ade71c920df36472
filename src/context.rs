use crate::clock::Clock;
use crate::config::DcaPlan;
use crate::db::TradeStore;
use crate::exchange::Exchange;
use crate::notify::{Notifier, PortfolioSnapshot};
use crate::portfolio::{compute_stats, runway, PortfolioStats};
use crate::scheduler::Eta;
use crate::Result;
use std::sync::Arc;

/// Collaborators built once at startup and handed to every component
#[derive(Clone)]
pub struct AppContext {
    pub plan: Arc<DcaPlan>,
    pub exchange: Arc<dyn Exchange>,
    pub store: Arc<dyn TradeStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn new(
        plan: DcaPlan,
        exchange: Arc<dyn Exchange>,
        store: Arc<dyn TradeStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            plan: Arc::new(plan),
            exchange,
            store,
            notifier,
            clock,
        }
    }

    /// Blended stats over the whole ledger
    pub async fn portfolio_stats(&self) -> Result<PortfolioStats> {
        let trades = self.store.all_trades().await?;
        Ok(compute_stats(&trades, &self.plan.initial))
    }

    /// Attach current price, balance and runway to `stats`.
    /// Exchange failures leave the fields empty instead of failing.
    pub async fn snapshot(&self, stats: PortfolioStats, next_purchase: Eta) -> PortfolioSnapshot {
        let price = match self.exchange.get_price().await {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::warn!("Could not fetch price for status message: {}", e);
                None
            }
        };

        let balance = match self.exchange.get_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!("Could not fetch balance for status message: {}", e);
                None
            }
        };

        PortfolioSnapshot {
            stats,
            initial: self.plan.initial,
            price,
            balance,
            runway: balance.map(|b| runway(b.quote_free, self.plan.amount_usd, &self.plan.cadence)),
            cadence: self.plan.cadence,
            amount_usd: self.plan.amount_usd,
            next_purchase,
            taken_at: self.clock.now(),
        }
    }
}
