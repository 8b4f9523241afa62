pub mod sender;

use crate::model::{Listing, NotifyError, UserId};
use crate::notifier::Notifier;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::info;

const TELEGRAM_API: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    pub bot_token: String,
    pub client: Client,
    pub api_base: String,
    pub send_timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(bot_token: String) -> Result<Self, NotifyError> {
        Self::with_api_base(bot_token, TELEGRAM_API)
    }

    pub fn with_api_base(bot_token: String, api_base: &str) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::ApiError(format!("client build failed: {}", e)))?;
        Ok(Self {
            bot_token,
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            send_timeout: Duration::from_secs(10),
        })
    }

    pub fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    pub async fn notify_text(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        sender::send_text(self, chat_id, text).await
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_listing(
        &self,
        user_id: UserId,
        title: &str,
        listing: &Listing,
    ) -> Result<(), NotifyError> {
        sender::send_listing(self, user_id, title, listing).await
    }

    async fn notify_expiring(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let message = sender::format_expiry_message(expires_at, now);
        info!("⏰ Reminding user {} about subscription end", user_id);
        sender::send_text(self, user_id, &message).await
    }
}
