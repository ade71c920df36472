use super::TradeStore;
use crate::clock::Clock;
use crate::models::{NewTrade, Trade};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct Ledger {
    trades: Vec<Trade>,
    cursors: HashMap<String, DateTime<Utc>>,
}

/// In-process ledger for dry runs without a database, and for tests.
/// Contents are lost when the process exits.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    ledger: Mutex<Ledger>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Insert a trade with a fixed timestamp, keeping the log ordered
    pub fn seed(&self, trade: Trade) {
        let mut ledger = self.ledger.lock().unwrap();
        let pos = ledger
            .trades
            .partition_point(|t| t.timestamp <= trade.timestamp);
        ledger.trades.insert(pos, trade);
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().unwrap().trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn append_trade(&self, trade: NewTrade) -> Result<Trade> {
        let mut ledger = self.ledger.lock().unwrap();

        // The store's clock is authoritative; never write behind the last entry
        let mut timestamp = self.clock.now();
        if let Some(last) = ledger.trades.last() {
            timestamp = timestamp.max(last.timestamp);
        }

        let trade = trade.into_trade(Uuid::new_v4(), timestamp);
        ledger.trades.push(trade.clone());

        tracing::debug!("Recorded trade {} ({}) in memory", trade.id, trade.order_id);
        Ok(trade)
    }

    async fn list_trades_since(&self, since: DateTime<Utc>) -> Result<Vec<Trade>> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger
            .trades
            .iter()
            .filter(|t| t.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn trade_exists_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger
            .trades
            .iter()
            .any(|t| t.timestamp >= start && t.timestamp <= end))
    }

    async fn get_report_cursor(&self, kind: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.ledger.lock().unwrap().cursors.get(kind).copied())
    }

    async fn set_report_cursor(&self, kind: &str, sent_at: DateTime<Utc>) -> Result<()> {
        self.ledger
            .lock()
            .unwrap()
            .cursors
            .insert(kind.to_string(), sent_at);
        Ok(())
    }
}
