// notifier/telegram/sender.rs

use crate::model::{Listing, NotifyError};
use crate::notifier::telegram::TelegramNotifier;
use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{info, warn};

/// Sends a plain text message to one chat.
pub async fn send_text(
    notifier: &TelegramNotifier,
    chat_id: i64,
    text: &str,
) -> Result<(), NotifyError> {
    let url = notifier.send_message_url();
    let params = [("chat_id", chat_id.to_string()), ("text", text.to_string())];
    let response = match timeout(
        notifier.send_timeout,
        notifier.client.post(&url).form(&params).send(),
    )
    .await
    {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            warn!("❌ Telegram send() failed: {}", e);
            return Err(NotifyError::ApiError(format!("Send failed: {}", e)));
        }
        Err(_) => {
            warn!("⏳ Telegram send() timed out");
            return Err(NotifyError::Unreachable);
        }
    };
    let status = response.status();
    let body = response.text().await.unwrap_or_else(|_| "unknown".into());
    if !status.is_success() {
        warn!("❌ Telegram API responded [{}]: {}", status, body);
        return Err(NotifyError::ApiError(format!("status {}: {}", status, body)));
    }
    info!("✅ Telegram message sent to {} [{}]", chat_id, status);
    Ok(())
}

/// Sends a matched listing to the filter owner's private chat.
pub async fn send_listing(
    notifier: &TelegramNotifier,
    chat_id: i64,
    title: &str,
    listing: &Listing,
) -> Result<(), NotifyError> {
    let message = format_listing_message(title, listing);
    info!("📤 Sending listing {} to {}", listing.external_id, chat_id);
    send_text(notifier, chat_id, &message).await
}

pub fn format_expiry_message(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let left = (expires_at - now).num_minutes().max(0);
    format!(
        "⏰ Your subscription ends in {} h {} min\n📅 {} UTC\nRenew it to keep receiving listings.",
        left / 60,
        left % 60,
        expires_at.format("%Y-%m-%d %H:%M")
    )
}

pub fn format_listing_message(title: &str, listing: &Listing) -> String {
    let mut lines = vec![format!("🚘 {}", if title.is_empty() { "New listing" } else { title })];
    if let Some(date) = listing.release_date {
        lines.push(format!("📅 {}", date.format("%m.%Y")));
    }
    match listing.price_converted {
        Some(price) => lines.push(format!("💰 {} ₽", group_thousands(price))),
        None => lines.push(format!("💰 {} ₩", group_thousands(listing.price_source))),
    }
    if let Some(mileage) = listing.mileage {
        lines.push(format!("🛣 {} km", group_thousands(mileage)));
    }
    if let Some(accidents) = listing.accidents_total {
        lines.push(format!("💥 Accidents: {}", accidents));
    }
    let mut flags = Vec::new();
    if listing.theft {
        flags.push("theft");
    }
    if listing.flood {
        flags.push("flood");
    }
    if listing.total_loss {
        flags.push("total loss");
    }
    if !flags.is_empty() {
        lines.push(format!("⚠️ {}", flags.join(", ")));
    }
    lines.push(format!("🔗 {}", listing.url));
    lines.join("\n")
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    if value < 0 {
        format!("-{}", out)
    } else {
        out
    }
}
