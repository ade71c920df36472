use super::Exchange;
use crate::error::DcaError;
use crate::models::{quote_to_string, round_base, round_quote, Balance, BuyFill};
use crate::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

// OKX REST API v5
// Docs: https://www.okx.com/docs-v5/en/
pub const OKX_API_BASE: &str = "https://www.okx.com";
const RATE_LIMIT_RPS: u32 = 10;
const MAX_RETRIES: u32 = 3;
const FILL_POLL_ATTEMPTS: u32 = 10;

type HmacSha256 = Hmac<Sha256>;

type OkxRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API key triple for signed endpoints
#[derive(Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl std::fmt::Debug for OkxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxCredentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .field("passphrase", &"***")
            .finish()
    }
}

/// Envelope around every OKX response
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    last: String,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    #[serde(default)]
    details: Vec<CurrencyBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrencyBalance {
    ccy: String,
    avail_bal: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest<'a> {
    inst_id: &'a str,
    td_mode: &'a str,
    side: &'a str,
    ord_type: &'a str,
    sz: String,
    tgt_ccy: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    #[serde(default)]
    ord_id: String,
    #[serde(default)]
    s_code: String,
    #[serde(default)]
    s_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDetails {
    ord_id: String,
    state: String,
    #[serde(default)]
    acc_fill_sz: String,
    #[serde(default)]
    avg_px: String,
    #[serde(default)]
    fee: String,
    #[serde(default)]
    fee_ccy: String,
}

/// OKX spot client for a single instrument (e.g. `BTC-USDT`)
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct OkxClient {
    client: Client,
    base_url: String,
    inst_id: String,
    credentials: OkxCredentials,
    rate_limiter: Arc<OkxRateLimiter>,
    poll_interval: Duration,
    retry_backoff: Duration,
}

impl OkxClient {
    pub fn new(base_url: &str, inst_id: &str, credentials: OkxCredentials) -> Result<Self> {
        if inst_id.split_once('-').is_none() {
            return Err(DcaError::Config(format!(
                "invalid OKX instrument '{}' (expected BASE-QUOTE)",
                inst_id
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_RPS).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            inst_id: inst_id.to_string(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            poll_interval: Duration::from_millis(500),
            retry_backoff: Duration::from_secs(1),
        })
    }

    /// Override the fill polling interval and the base retry backoff
    pub fn with_timing(mut self, poll_interval: Duration, retry_backoff: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.retry_backoff = retry_backoff;
        self
    }

    fn base_ccy(&self) -> &str {
        self.inst_id.split('-').next().unwrap_or_default()
    }

    fn quote_ccy(&self) -> &str {
        self.inst_id.split('-').nth(1).unwrap_or_default()
    }

    /// base64(HMAC-SHA256(secret, timestamp + method + path + body))
    fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .map_err(|e| DcaError::Config(format!("invalid OKX api secret: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn signed(&self, request: RequestBuilder, method: &str, path: &str, body: &str) -> Result<RequestBuilder> {
        let timestamp = chrono::Utc::now()
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string();
        let signature = self.sign(&timestamp, method, path, body)?;

        Ok(request
            .header("OK-ACCESS-KEY", &self.credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.credentials.passphrase))
    }

    /// Rate-limited GET with retry on 429 and 5xx
    async fn get<T: DeserializeOwned>(&self, path: &str, signed: bool) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            let mut request = self.client.get(&url);
            if signed {
                request = self.signed(request, "GET", path, "")?;
            }

            let backoff = self.retry_backoff * 2u32.pow(attempt - 1);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let envelope: Envelope<T> = response.json().await?;
                        return unwrap_envelope(path, envelope);
                    }

                    if (status.as_u16() == 429 || status.is_server_error()) && attempt < MAX_RETRIES {
                        tracing::warn!(
                            "OKX returned {} for {}, retrying in {:?} (attempt {}/{})",
                            status,
                            path,
                            backoff,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(DcaError::Exchange(format!(
                        "OKX API error ({}) on {}: {}",
                        status, path, error_text
                    )));
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Network error calling OKX: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DcaError::Exchange(format!(
            "OKX {} failed after {} retries",
            path, MAX_RETRIES
        )))
    }

    /// Place the market order. Never retried: a repeat could buy twice.
    async fn place_market_buy(&self, quote_amount: f64) -> Result<String> {
        let path = "/api/v5/trade/order";
        let body = serde_json::to_string(&OrderRequest {
            inst_id: &self.inst_id,
            td_mode: "cash",
            side: "buy",
            ord_type: "market",
            sz: quote_to_string(quote_amount),
            tgt_ccy: "quote_ccy",
        })?;

        self.rate_limiter.until_ready().await;

        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .body(body.clone());
        let response = self.signed(request, "POST", path, &body)?.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DcaError::Exchange(format!(
                "OKX rejected order ({}): {}",
                status, error_text
            )));
        }

        let envelope: Envelope<OrderAck> = response.json().await?;
        let ack_error = envelope
            .data
            .first()
            .filter(|ack| !ack.s_msg.is_empty())
            .map(|ack| format!(" ({} {})", ack.s_code, ack.s_msg))
            .unwrap_or_default();

        let acks = match unwrap_envelope(path, envelope) {
            Ok(acks) => acks,
            Err(e) => return Err(DcaError::Exchange(format!("{}{}", e, ack_error))),
        };

        match acks.into_iter().next() {
            Some(ack) if ack.s_code == "0" && !ack.ord_id.is_empty() => Ok(ack.ord_id),
            Some(ack) => Err(DcaError::Exchange(format!(
                "OKX rejected order: {} {}",
                ack.s_code, ack.s_msg
            ))),
            None => Err(DcaError::Exchange("OKX returned no order id".to_string())),
        }
    }

    /// Poll the order until it is filled or the attempts run out.
    /// A partially filled order that stops progressing is reported as filled
    /// for whatever executed.
    async fn wait_for_fill(&self, ord_id: &str) -> Result<BuyFill> {
        let path = format!("/api/v5/trade/order?instId={}&ordId={}", self.inst_id, ord_id);
        let mut last: Option<OrderDetails> = None;

        for attempt in 1..=FILL_POLL_ATTEMPTS {
            tokio::time::sleep(self.poll_interval).await;

            let details = self
                .get::<OrderDetails>(&path, true)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| DcaError::Exchange(format!("order {} not found", ord_id)))?;

            tracing::debug!(
                "Order {} state {} (poll {}/{})",
                ord_id,
                details.state,
                attempt,
                FILL_POLL_ATTEMPTS
            );

            match details.state.as_str() {
                "filled" => return self.fill_from(&details),
                "canceled" | "mmp_canceled" => {
                    if parse_num(&details.acc_fill_sz, "accFillSz")? > 0.0 {
                        tracing::warn!("Order {} canceled after a partial fill", ord_id);
                        return self.fill_from(&details);
                    }
                    return Err(DcaError::Exchange(format!(
                        "order {} was canceled without a fill",
                        ord_id
                    )));
                }
                _ => last = Some(details),
            }
        }

        match last {
            Some(details) if parse_num(&details.acc_fill_sz, "accFillSz")? > 0.0 => {
                tracing::warn!(
                    "Order {} still {} after {} polls, recording the partial fill",
                    ord_id,
                    details.state,
                    FILL_POLL_ATTEMPTS
                );
                self.fill_from(&details)
            }
            _ => Err(DcaError::Exchange(format!(
                "order {} not filled after {} polls",
                ord_id, FILL_POLL_ATTEMPTS
            ))),
        }
    }

    /// Filled values net of fees charged in the base asset
    fn fill_from(&self, details: &OrderDetails) -> Result<BuyFill> {
        let filled = parse_num(&details.acc_fill_sz, "accFillSz")?;
        let avg_px = parse_num(&details.avg_px, "avgPx")?;
        // OKX reports charged fees as negative numbers
        let fee = parse_num(&details.fee, "fee")?.abs();

        let units = if details.fee_ccy == self.base_ccy() {
            filled - fee
        } else {
            filled
        };

        if units <= 0.0 || avg_px <= 0.0 {
            return Err(DcaError::Exchange(format!(
                "order {} reported an empty fill (accFillSz {}, avgPx {})",
                details.ord_id, details.acc_fill_sz, details.avg_px
            )));
        }

        Ok(BuyFill {
            order_id: details.ord_id.clone(),
            executed_units: round_base(units),
            executed_usd: round_quote(filled * avg_px),
            executed_price: avg_px,
        })
    }
}

#[async_trait]
impl Exchange for OkxClient {
    async fn get_price(&self) -> Result<f64> {
        let path = format!("/api/v5/market/ticker?instId={}", self.inst_id);
        let ticker = self
            .get::<Ticker>(&path, false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DcaError::Exchange(format!("no ticker for {}", self.inst_id)))?;

        parse_num(&ticker.last, "last")
    }

    async fn get_balance(&self) -> Result<Balance> {
        let path = format!(
            "/api/v5/account/balance?ccy={},{}",
            self.base_ccy(),
            self.quote_ccy()
        );
        let account = self
            .get::<AccountBalance>(&path, true)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DcaError::Exchange("empty balance response".to_string()))?;

        let mut balance = Balance::default();
        for detail in &account.details {
            let available = parse_num(&detail.avail_bal, "availBal")?;
            if detail.ccy == self.quote_ccy() {
                balance.quote_free = available;
            } else if detail.ccy == self.base_ccy() {
                balance.base_free = available;
            }
        }

        Ok(balance)
    }

    async fn buy(&self, quote_amount: f64) -> Result<BuyFill> {
        tracing::info!(
            "Placing market buy on {} for {} {}",
            self.inst_id,
            quote_to_string(quote_amount),
            self.quote_ccy()
        );

        let result = match self.place_market_buy(quote_amount).await {
            Ok(ord_id) => self.wait_for_fill(&ord_id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(fill) => {
                tracing::info!(
                    order_id = %fill.order_id,
                    "Order filled: {:.8} units for {:.2} at {:.2}",
                    fill.executed_units,
                    fill.executed_usd,
                    fill.executed_price
                );
                Ok(fill)
            }
            Err(e @ DcaError::Exchange(_)) => Err(e),
            Err(other) => Err(DcaError::Exchange(other.to_string())),
        }
    }
}

fn unwrap_envelope<T>(path: &str, envelope: Envelope<T>) -> Result<Vec<T>> {
    if envelope.code != "0" {
        return Err(DcaError::Exchange(format!(
            "OKX error {} on {}: {}",
            envelope.code,
            path.split('?').next().unwrap_or(path),
            envelope.msg
        )));
    }
    Ok(envelope.data)
}

/// OKX sends numbers as strings; empty means zero
fn parse_num(value: &str, field: &str) -> Result<f64> {
    if value.is_empty() {
        return Ok(0.0);
    }
    value
        .parse()
        .map_err(|_| DcaError::Exchange(format!("invalid {} '{}' from OKX", field, value)))
}
