// Trade ledger: the append-only trade log and the report cursors
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::models::{NewTrade, Trade};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Cursor kind used by the periodic summary report
pub const SUMMARY_CURSOR: &str = "summary";

/// Persistent trade log.
///
/// Trades are append-only and ordered by the timestamp the store assigns at
/// write time. Concurrent appends need no coordination.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Append a trade. The store assigns the id and the timestamp.
    async fn append_trade(&self, trade: NewTrade) -> Result<Trade>;

    /// Trades with `timestamp >= since`, oldest first
    async fn list_trades_since(&self, since: DateTime<Utc>) -> Result<Vec<Trade>>;

    /// Whether any trade has `start <= timestamp <= end`
    async fn trade_exists_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool>;

    async fn get_report_cursor(&self, kind: &str) -> Result<Option<DateTime<Utc>>>;

    /// Single upsert keyed by `kind`
    async fn set_report_cursor(&self, kind: &str, sent_at: DateTime<Utc>) -> Result<()>;

    /// The whole ledger, oldest first
    async fn all_trades(&self) -> Result<Vec<Trade>> {
        self.list_trades_since(DateTime::UNIX_EPOCH).await
    }
}
