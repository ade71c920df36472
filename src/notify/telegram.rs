use super::format;
use super::{Notifier, SummaryReport, TradeNotification};
use crate::error::DcaError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

// Telegram Bot API
// Docs: https://core.telegram.org/bots/api
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

/// Sends HTML messages to a single authorized chat
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: i64,
    notification_sound: bool,
}

impl TelegramNotifier {
    pub fn new(base_url: &str, bot_token: &str, chat_id: i64, notification_sound: bool) -> Result<Self> {
        if bot_token.is_empty() {
            return Err(DcaError::Config("telegram bot token is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id,
            notification_sound,
        })
    }

    /// The only user allowed to talk to the bot
    pub fn chat_id(&self) -> i64 {
        self.chat_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    async fn read_response<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<Option<T>> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| DcaError::Notification(format!("{} ({}): unreadable response: {}", method, status, e)))?;

        if !body.ok {
            return Err(DcaError::Notification(format!(
                "{} failed ({}): {}",
                method,
                status,
                body.description.unwrap_or_else(|| "no description".to_string())
            )));
        }

        Ok(body.result)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
                "disable_notification": !self.notification_sound,
            }))
            .send()
            .await
            .map_err(|e| DcaError::Notification(format!("sendMessage: {}", e)))?;

        Self::read_response::<serde_json::Value>("sendMessage", response).await?;
        tracing::debug!("Sent Telegram message to chat {}", chat_id);
        Ok(())
    }

    /// Send to the authorized chat
    pub async fn send(&self, text: &str) -> Result<()> {
        self.send_message(self.chat_id, text).await
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .timeout(Duration::from_secs(timeout_secs + 10))
            .send()
            .await
            .map_err(|e| DcaError::Notification(format!("getUpdates: {}", e)))?;

        Ok(Self::read_response::<Vec<Update>>("getUpdates", response)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_trade(&self, notification: &TradeNotification) -> Result<()> {
        self.send(&format::trade_message(notification)).await
    }

    async fn notify_insufficient_balance(&self, balance: f64, required: f64) -> Result<()> {
        self.send(&format::insufficient_balance_message(balance, required))
            .await
    }

    async fn notify_summary(&self, report: &SummaryReport) -> Result<()> {
        self.send(&format::summary_message(report)).await
    }
}
