// Exchange access: the trait the engine consumes and its implementations
pub mod dry_run;
pub mod okx;

pub use dry_run::DryRunExchange;
pub use okx::{OkxClient, OkxCredentials};

use crate::models::{Balance, BuyFill};
use crate::Result;
use async_trait::async_trait;

/// Spot exchange account trading one pair
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Last traded price of the base asset in quote currency
    async fn get_price(&self) -> Result<f64>;

    /// Free balances of the quote currency and the base asset
    async fn get_balance(&self) -> Result<Balance>;

    /// Market buy spending `quote_amount`. Returns the filled values, which
    /// may differ from the request (fees, partial fills).
    async fn buy(&self, quote_amount: f64) -> Result<BuyFill>;
}
