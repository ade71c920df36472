use super::Exchange;
use crate::error::DcaError;
use crate::models::{round_base, round_quote, Balance, BuyFill, DRY_RUN_ORDER_ID};
use crate::Result;
use async_trait::async_trait;

/// Reads from the wrapped exchange but never places an order.
/// Purchases are simulated at the current price.
pub struct DryRunExchange<E> {
    inner: E,
}

impl<E: Exchange> DryRunExchange<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<E: Exchange> Exchange for DryRunExchange<E> {
    async fn get_price(&self) -> Result<f64> {
        self.inner.get_price().await
    }

    async fn get_balance(&self) -> Result<Balance> {
        self.inner.get_balance().await
    }

    async fn buy(&self, quote_amount: f64) -> Result<BuyFill> {
        let price = self.inner.get_price().await?;
        if price <= 0.0 {
            return Err(DcaError::Exchange(format!(
                "cannot simulate a fill at price {}",
                price
            )));
        }

        let executed_usd = round_quote(quote_amount);
        let executed_units = round_base(executed_usd / price);
        if executed_usd <= 0.0 || executed_units <= 0.0 {
            return Err(DcaError::Exchange(format!(
                "${} at {:.2} rounds to an empty fill",
                quote_amount, price
            )));
        }

        tracing::info!(
            "🧪 DRY RUN: would buy {:.8} units for {:.2} at {:.2}",
            executed_units,
            executed_usd,
            price
        );

        Ok(BuyFill {
            order_id: DRY_RUN_ORDER_ID.to_string(),
            executed_units,
            executed_usd,
            executed_price: price,
        })
    }
}
