use crate::clock::Clock;
use crate::context::AppContext;
use crate::db::SUMMARY_CURSOR;
use crate::models::Trade;
use crate::notify::SummaryReport;
use crate::scheduler::{FiredJob, ScheduleView, PURCHASE_TAG};
use crate::Result;
use chrono::{DateTime, Timelike, Utc};

/// Builds and sends the summary for each fired report job.
///
/// Each report covers `[now - lookback, now)`, so back-to-back reports never
/// count the same trade twice.
pub struct ReportWindower {
    ctx: AppContext,
    view: ScheduleView,
}

impl ReportWindower {
    pub fn new(ctx: AppContext, view: ScheduleView) -> Self {
        Self { ctx, view }
    }

    /// Half-open window `[now - lookback, now)`
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.ctx.plan.lookback, now)
    }

    /// A daily purchase firing this same minute sends its own notification
    pub fn collides_with_purchase(&self, now: DateTime<Utc>) -> bool {
        match self.ctx.plan.cadence.time_of_day() {
            Some((hour, minute)) => now.hour() == hour && now.minute() == minute,
            None => false,
        }
    }

    pub async fn trades_in_window(&self, now: DateTime<Utc>) -> Result<Vec<Trade>> {
        let (start, end) = self.window(now);
        let mut trades = self.ctx.store.list_trades_since(start).await?;
        // Anything written after the snapshot belongs to the next window
        trades.retain(|t| t.timestamp < end);
        Ok(trades)
    }

    /// Trades recorded after the last summary went out (all trades if none has)
    pub async fn count_since_last_report(&self) -> Result<usize> {
        let store = &self.ctx.store;
        let count = match store.get_report_cursor(SUMMARY_CURSOR).await? {
            Some(last_sent) => store
                .list_trades_since(last_sent)
                .await?
                .iter()
                .filter(|t| t.timestamp > last_sent)
                .count(),
            None => store.all_trades().await?.len(),
        };
        Ok(count)
    }

    /// Send the summary for `job`. Returns whether a summary went out.
    pub async fn run(&self, job: &FiredJob) -> Result<bool> {
        let now = self.ctx.clock.now();

        if self.collides_with_purchase(now) {
            tracing::info!(
                "Skipping summary {}: purchase runs at the same time",
                job.tag
            );
            return Ok(false);
        }

        let trades = self.trades_in_window(now).await?;
        let since_last_report = self.count_since_last_report().await?;
        let stats = self.ctx.portfolio_stats().await?;
        let snapshot = self
            .ctx
            .snapshot(stats, self.view.time_until_next(PURCHASE_TAG))
            .await;

        let (window_start, window_end) = self.window(now);
        let report = SummaryReport {
            trades,
            window_start,
            window_end,
            since_last_report,
            snapshot,
        };

        tracing::info!(
            "📊 Summary {}: {} trade(s) in window, {} since last summary",
            job.tag,
            report.trades.len(),
            since_last_report
        );

        if let Err(e) = self.ctx.notifier.notify_summary(&report).await {
            tracing::warn!("Failed to send summary {}: {}", job.tag, e);
            return Ok(false);
        }

        self.ctx.store.set_report_cursor(SUMMARY_CURSOR, now).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DcaPlan;
    use crate::db::{MemoryStore, TradeStore};
    use crate::error::DcaError;
    use crate::exchange::{DryRunExchange, Exchange};
    use crate::models::{Balance, BuyFill, NewTrade};
    use crate::notify::{Notifier, TradeNotification};
    use crate::scheduler::{Cadence, JobKind};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    struct FixedExchange;

    #[async_trait]
    impl Exchange for FixedExchange {
        async fn get_price(&self) -> Result<f64> {
            Ok(60000.0)
        }

        async fn get_balance(&self) -> Result<Balance> {
            Ok(Balance {
                quote_free: 1000.0,
                base_free: 0.0,
            })
        }

        async fn buy(&self, _quote_amount: f64) -> Result<BuyFill> {
            Err(DcaError::Exchange("not used".to_string()))
        }
    }

    #[derive(Default)]
    struct SummaryRecorder {
        fail: bool,
        summaries: Mutex<Vec<SummaryReport>>,
    }

    #[async_trait]
    impl Notifier for SummaryRecorder {
        async fn notify_trade(&self, _notification: &TradeNotification) -> Result<()> {
            Ok(())
        }

        async fn notify_insufficient_balance(&self, _balance: f64, _required: f64) -> Result<()> {
            Ok(())
        }

        async fn notify_summary(&self, report: &SummaryReport) -> Result<()> {
            if self.fail {
                return Err(DcaError::Notification("telegram down".to_string()));
            }
            self.summaries.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, h, m, 0).unwrap()
    }

    fn trade_at(ts: DateTime<Utc>) -> Trade {
        NewTrade {
            usd_amount: 50.0,
            unit_amount: 0.001,
            price: 50000.0,
            order_id: format!("ord-{}", ts.timestamp()),
            dry_run: false,
        }
        .into_trade(Uuid::new_v4(), ts)
    }

    fn report_job(h: u32, m: u32) -> FiredJob {
        FiredJob {
            tag: format!("report@{:02}:{:02}", h, m),
            kind: JobKind::Report,
            cadence: Cadence::daily_at(h, m).unwrap(),
            slot: at(1, h, m),
            fired_at: at(1, h, m),
        }
    }

    struct Harness {
        windower: ReportWindower,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        notifier: Arc<SummaryRecorder>,
    }

    fn harness(now: DateTime<Utc>, cadence: Cadence, notifier: SummaryRecorder) -> Harness {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let notifier = Arc::new(notifier);
        let ctx = AppContext::new(
            DcaPlan::new(50.0, cadence),
            Arc::new(DryRunExchange::new(FixedExchange)),
            store.clone(),
            notifier.clone(),
            clock.clone(),
        );
        let view = ScheduleView::new(clock.clone());
        Harness {
            windower: ReportWindower::new(ctx, view),
            clock,
            store,
            notifier,
        }
    }

    #[tokio::test]
    async fn test_adjacent_windows_count_boundary_trade_once() {
        let t = at(1, 20, 0);
        let h = harness(t, Cadence::hourly(), SummaryRecorder::default());
        h.store.seed(trade_at(t - Duration::hours(1)));
        h.store.seed(trade_at(t));
        h.store.seed(trade_at(t + Duration::hours(1)));

        let first = h.windower.trades_in_window(t).await.unwrap();
        let second = h
            .windower
            .trades_in_window(t + Duration::hours(12))
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].timestamp, t);
        assert!(first.iter().all(|a| second.iter().all(|b| a.id != b.id)));
    }

    #[tokio::test]
    async fn test_window_excludes_trades_older_than_lookback() {
        let now = at(2, 8, 0);
        let h = harness(now, Cadence::hourly(), SummaryRecorder::default());
        h.store.seed(trade_at(now - Duration::hours(12) - Duration::seconds(1)));
        h.store.seed(trade_at(now - Duration::hours(12)));

        let trades = h.windower.trades_in_window(now).await.unwrap();
        assert_eq!(trades.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_suppressed_at_purchase_time() {
        let h = harness(
            at(1, 9, 0),
            Cadence::daily_at(9, 0).unwrap(),
            SummaryRecorder::default(),
        );

        assert!(!h.windower.run(&report_job(9, 0)).await.unwrap());
        assert!(h.notifier.summaries.lock().unwrap().is_empty());
        assert_eq!(h.store.get_report_cursor(SUMMARY_CURSOR).await.unwrap(), None);

        // Interval cadences never collide
        let h = harness(at(1, 9, 0), Cadence::hourly(), SummaryRecorder::default());
        assert!(h.windower.run(&report_job(9, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_cursor_advances_after_send() {
        let h = harness(
            at(1, 21, 0),
            Cadence::daily_at(9, 0).unwrap(),
            SummaryRecorder::default(),
        );
        h.store.seed(trade_at(at(1, 9, 0)));
        h.store.seed(trade_at(at(1, 10, 0)));

        // No cursor yet: every trade counts
        assert_eq!(h.windower.count_since_last_report().await.unwrap(), 2);

        assert!(h.windower.run(&report_job(21, 0)).await.unwrap());
        assert_eq!(
            h.store.get_report_cursor(SUMMARY_CURSOR).await.unwrap(),
            Some(at(1, 21, 0))
        );

        let sent = h.notifier.summaries.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].trades.len(), 2);
        assert_eq!(sent[0].since_last_report, 2);
        assert_eq!(sent[0].window_start, at(1, 9, 0));
        assert_eq!(sent[0].window_end, at(1, 21, 0));
        assert_eq!(sent[0].snapshot.price, Some(60000.0));

        assert_eq!(h.windower.count_since_last_report().await.unwrap(), 0);

        h.clock.advance(Duration::hours(1));
        h.store
            .append_trade(NewTrade::from_fill(
                &BuyFill {
                    order_id: "ord-next".to_string(),
                    executed_units: 0.001,
                    executed_usd: 50.0,
                    executed_price: 50000.0,
                },
                false,
            ))
            .await
            .unwrap();
        assert_eq!(h.windower.count_since_last_report().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_cursor() {
        let notifier = SummaryRecorder {
            fail: true,
            ..Default::default()
        };
        let h = harness(at(1, 21, 0), Cadence::hourly(), notifier);
        h.store.seed(trade_at(at(1, 20, 0)));

        assert!(!h.windower.run(&report_job(21, 0)).await.unwrap());
        assert_eq!(h.store.get_report_cursor(SUMMARY_CURSOR).await.unwrap(), None);
        assert_eq!(h.windower.count_since_last_report().await.unwrap(), 1);
    }
}
