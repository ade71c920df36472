use super::guard::DuplicateGuard;
use crate::context::AppContext;
use crate::models::{NewTrade, Trade};
use crate::notify::TradeNotification;
use crate::scheduler::{FiredJob, ScheduleView, PURCHASE_TAG};

/// What a purchase cycle ended with
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Purchased(Trade),
    Skipped,
    InsufficientBalance { balance: f64, required: f64 },
    ExchangeFailed,
    PersistenceFailed { order_id: String },
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub reason: String,
}

impl CycleReport {
    fn new(outcome: CycleOutcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
        }
    }
}

/// Runs one purchase cycle per fired purchase job:
/// guard, balance check, buy, persist, notify.
pub struct ExecutionEngine {
    ctx: AppContext,
    view: ScheduleView,
    guard: DuplicateGuard,
}

impl ExecutionEngine {
    pub fn new(ctx: AppContext, view: ScheduleView) -> Self {
        let guard = DuplicateGuard::new(ctx.store.clone(), ctx.clock.clone());
        Self { ctx, view, guard }
    }

    /// Run a full purchase cycle. Never returns an error: every failure is
    /// logged here and reported in the outcome.
    pub async fn execute(&self, job: &FiredJob) -> CycleReport {
        let plan = &self.ctx.plan;
        let amount = plan.amount_usd;
        tracing::info!("💵 Purchase cycle for slot {} (${:.2})", job.slot, amount);

        // Check 1: has this slot already been bought?
        match self.guard.check(&plan.cadence, plan.interval_guard).await {
            Ok(true) => {
                tracing::info!("Skipping purchase: slot {} already has a trade", job.slot);
                return CycleReport::new(CycleOutcome::Skipped, "Duplicate of an executed slot");
            }
            Ok(false) => {}
            Err(e) => {
                // Without the ledger we cannot tell a re-fire from a new slot
                tracing::error!("Duplicate check failed, skipping purchase: {}", e);
                return CycleReport::new(CycleOutcome::Skipped, format!("Duplicate check failed: {}", e));
            }
        }

        // Check 2: enough quote currency for one purchase?
        let balance = match self.ctx.exchange.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!("Failed to fetch balance: {}", e);
                return CycleReport::new(CycleOutcome::ExchangeFailed, format!("Balance query failed: {}", e));
            }
        };

        if balance.quote_free < amount {
            tracing::warn!(
                "⚠️  Insufficient balance: ${:.2} < ${:.2}",
                balance.quote_free,
                amount
            );
            if let Err(e) = self
                .ctx
                .notifier
                .notify_insufficient_balance(balance.quote_free, amount)
                .await
            {
                tracing::warn!("Failed to send insufficient balance notification: {}", e);
            }
            return CycleReport::new(
                CycleOutcome::InsufficientBalance {
                    balance: balance.quote_free,
                    required: amount,
                },
                "Balance below purchase amount",
            );
        }

        // Buy
        let fill = match self.ctx.exchange.buy(amount).await {
            Ok(fill) => fill,
            Err(e) => {
                tracing::error!("❌ Purchase failed: {}", e);
                return CycleReport::new(CycleOutcome::ExchangeFailed, format!("Buy failed: {}", e));
            }
        };

        if !fill.is_filled() {
            tracing::error!(
                order_id = %fill.order_id,
                "❌ Exchange reported an empty fill ({} units for ${}), nothing recorded",
                fill.executed_units,
                fill.executed_usd
            );
            return CycleReport::new(
                CycleOutcome::ExchangeFailed,
                format!("Empty fill for order {}", fill.order_id),
            );
        }

        tracing::info!(
            order_id = %fill.order_id,
            "✅ Filled {:.8} units for ${:.2} (avg ${:.2})",
            fill.executed_units,
            fill.executed_usd,
            fill.executed_price
        );

        // Persist the filled values before anyone is told about them
        let trade = match self
            .ctx
            .store
            .append_trade(NewTrade::from_fill(&fill, plan.dry_run))
            .await
        {
            Ok(trade) => trade,
            Err(e) => {
                tracing::error!(
                    order_id = %fill.order_id,
                    "🚨 Order filled but could not be recorded, needs operator attention: {}",
                    e
                );
                return CycleReport::new(
                    CycleOutcome::PersistenceFailed {
                        order_id: fill.order_id.clone(),
                    },
                    format!("Ledger write failed: {}", e),
                );
            }
        };

        tracing::info!("💾 Recorded trade {} at {}", trade.id, trade.timestamp);
        self.announce(&trade).await;

        CycleReport::new(CycleOutcome::Purchased(trade), "Purchase executed and recorded")
    }

    /// Best effort: the trade is already recorded
    async fn announce(&self, trade: &Trade) {
        let stats = match self.ctx.portfolio_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Could not compute stats for trade notification: {}", e);
                return;
            }
        };

        let snapshot = self
            .ctx
            .snapshot(stats, self.view.time_until_next(PURCHASE_TAG))
            .await;
        let notification = TradeNotification {
            trade: trade.clone(),
            snapshot,
        };

        if let Err(e) = self.ctx.notifier.notify_trade(&notification).await {
            tracing::warn!("Failed to send trade notification: {}", e);
        }
    }
}
