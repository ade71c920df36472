use super::TradeStore;
use crate::error::DcaError;
use crate::models::{NewTrade, Trade, BASE_DECIMALS};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;

/// Postgres trade ledger
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run pending migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres trade ledger");

        Ok(Self { pool })
    }

    /// Delete every trade and cursor (testing only)
    #[cfg(test)]
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM trades").execute(&self.pool).await?;
        sqlx::query("DELETE FROM report_cursors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TradeStore for PostgresStore {
    async fn append_trade(&self, trade: NewTrade) -> Result<Trade> {
        let id = Uuid::new_v4();

        // executed_at comes from the database clock, not ours
        let row = sqlx::query(
            r#"
            INSERT INTO trades (id, executed_at, usd_amount, unit_amount, price, order_id, dry_run)
            VALUES ($1, clock_timestamp(), $2, $3, $4, $5, $6)
            RETURNING executed_at
            "#,
        )
        .bind(id)
        .bind(to_decimal(trade.usd_amount)?)
        .bind(to_decimal(trade.unit_amount)?)
        .bind(to_decimal(trade.price)?)
        .bind(&trade.order_id)
        .bind(trade.dry_run)
        .fetch_one(&self.pool)
        .await?;

        let executed_at: DateTime<Utc> = row.get("executed_at");

        tracing::debug!(
            "Saved trade {} (order {}) to Postgres at {}",
            id,
            trade.order_id,
            executed_at
        );

        Ok(trade.into_trade(id, executed_at))
    }

    async fn list_trades_since(&self, since: DateTime<Utc>) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT id, executed_at, usd_amount, unit_amount, price, order_id, dry_run
            FROM trades
            WHERE executed_at >= $1
            ORDER BY executed_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let trades = rows.iter().map(trade_from_row).collect::<Result<Vec<_>>>()?;

        tracing::debug!("Loaded {} trades since {} from Postgres", trades.len(), since);

        Ok(trades)
    }

    async fn trade_exists_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM trades
                WHERE executed_at >= $1 AND executed_at <= $2
            ) AS found
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("found"))
    }

    async fn get_report_cursor(&self, kind: &str) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_sent_at FROM report_cursors WHERE kind = $1")
            .bind(kind)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("last_sent_at")))
    }

    async fn set_report_cursor(&self, kind: &str, sent_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO report_cursors (kind, last_sent_at)
            VALUES ($1, $2)
            ON CONFLICT (kind) DO UPDATE SET
                last_sent_at = EXCLUDED.last_sent_at,
                updated_at = NOW()
            "#,
        )
        .bind(kind)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn trade_from_row(row: &PgRow) -> Result<Trade> {
    let usd_amount: Decimal = row.get("usd_amount");
    let unit_amount: Decimal = row.get("unit_amount");
    let price: Decimal = row.get("price");

    Ok(Trade {
        id: row.get("id"),
        timestamp: row.get("executed_at"),
        usd_amount: from_decimal(usd_amount)?,
        unit_amount: from_decimal(unit_amount)?,
        price: from_decimal(price)?,
        order_id: row.get("order_id"),
        dry_run: row.get("dry_run"),
    })
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(BASE_DECIMALS))
        .ok_or_else(|| DcaError::Persistence(format!("{} is not representable as NUMERIC", value)))
}

fn from_decimal(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| DcaError::Persistence(format!("NUMERIC {} does not fit in f64", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SUMMARY_CURSOR;

    async fn get_test_db() -> PostgresStore {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/dcabot_test".to_string());

        PostgresStore::new(&database_url)
            .await
            .expect("Failed to connect to test database")
    }

    fn new_trade(order_id: &str, usd: f64, units: f64) -> NewTrade {
        NewTrade {
            usd_amount: usd,
            unit_amount: units,
            price: usd / units,
            order_id: order_id.to_string(),
            dry_run: false,
        }
    }

    #[test]
    fn test_decimal_conversion_keeps_base_precision() {
        let d = to_decimal(0.001234567891).unwrap();
        assert_eq!(d.to_string(), "0.00123457");
        assert!((from_decimal(d).unwrap() - 0.00123457).abs() < 1e-15);
        assert!(to_decimal(f64::NAN).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_append_and_list_trades() {
        let db = get_test_db().await;
        db.clear_all().await.unwrap();

        let first = db
            .append_trade(new_trade("okx-1", 50.0, 0.00099))
            .await
            .unwrap();
        let second = db
            .append_trade(new_trade("okx-2", 50.0, 0.001))
            .await
            .unwrap();

        assert!(second.timestamp >= first.timestamp);

        let trades = db.all_trades().await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].order_id, "okx-1");
        assert_eq!(trades[0].unit_amount, 0.00099);
        assert_eq!(trades[1].id, second.id);

        db.clear_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_trade_exists_in_range() {
        let db = get_test_db().await;
        db.clear_all().await.unwrap();

        let trade = db
            .append_trade(new_trade("okx-3", 25.0, 0.0005))
            .await
            .unwrap();

        let ts = trade.timestamp;
        assert!(db.trade_exists_in_range(ts, ts).await.unwrap());
        assert!(!db
            .trade_exists_in_range(ts + chrono::Duration::seconds(1), ts + chrono::Duration::minutes(5))
            .await
            .unwrap());

        db.clear_all().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_report_cursor_upsert() {
        let db = get_test_db().await;
        db.clear_all().await.unwrap();

        assert_eq!(db.get_report_cursor(SUMMARY_CURSOR).await.unwrap(), None);

        let first = Utc::now() - chrono::Duration::hours(12);
        let second = Utc::now();
        db.set_report_cursor(SUMMARY_CURSOR, first).await.unwrap();
        db.set_report_cursor(SUMMARY_CURSOR, second).await.unwrap();

        let stored = db.get_report_cursor(SUMMARY_CURSOR).await.unwrap().unwrap();
        // Postgres keeps microseconds
        assert!((stored - second).num_milliseconds().abs() < 1);

        db.clear_all().await.unwrap();
    }
}
