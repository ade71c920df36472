use super::format;
use super::telegram::{TelegramNotifier, Update};
use crate::context::AppContext;
use crate::notify::PortfolioSnapshot;
use crate::scheduler::{ScheduleView, PURCHASE_TAG};
use crate::Result;
use std::time::Duration;
use tokio::sync::watch;

/// Long-poll timeout passed to getUpdates
const POLL_TIMEOUT_SECS: u64 = 30;

/// Answers chat commands (/start, /stats, /balance) from the authorized user
pub struct CommandPoller {
    telegram: TelegramNotifier,
    ctx: AppContext,
    view: ScheduleView,
}

impl CommandPoller {
    pub fn new(telegram: TelegramNotifier, ctx: AppContext, view: ScheduleView) -> Self {
        Self { telegram, ctx, view }
    }

    /// Poll for commands until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("🤖 Listening for chat commands");
        let mut offset = 0i64;

        loop {
            let updates = tokio::select! {
                result = self.telegram.get_updates(offset, POLL_TIMEOUT_SECS) => result,
                _ = shutdown.changed() => break,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to poll chat updates: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        tracing::info!("Command poller stopped");
    }

    async fn handle_update(&self, update: Update) {
        let message = match update.message {
            Some(message) => message,
            None => return,
        };
        let (user_id, text) = match (message.from, message.text) {
            (Some(user), Some(text)) => (user.id, text),
            _ => return,
        };

        let reply = match self.respond(user_id, &text).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Failed to answer {}: {}", text, e);
                "Error fetching statistics. Please try again later.".to_string()
            }
        };

        if let Err(e) = self.telegram.send_message(message.chat.id, &reply).await {
            tracing::warn!("Failed to send command reply: {}", e);
        }
    }

    /// Reply to `text` from `user_id`; `None` when the sender is not authorized
    pub async fn respond(&self, user_id: i64, text: &str) -> Result<Option<String>> {
        if user_id != self.telegram.chat_id() {
            tracing::warn!("Unauthorized command {:?} from user {}", text, user_id);
            return Ok(None);
        }

        // "/stats@my_bot arg" -> "/stats"
        let command = text
            .split_whitespace()
            .next()
            .unwrap_or("")
            .split('@')
            .next()
            .unwrap_or("");

        let reply = match command {
            "/start" | "/stats" => format::stats_message(&self.snapshot().await?),
            "/balance" => format::balance_message(&self.snapshot().await?),
            _ => format::help_message(),
        };
        Ok(Some(reply))
    }

    async fn snapshot(&self) -> Result<PortfolioSnapshot> {
        let stats = self.ctx.portfolio_stats().await?;
        Ok(self
            .ctx
            .snapshot(stats, self.view.time_until_next(PURCHASE_TAG))
            .await)
    }
}
