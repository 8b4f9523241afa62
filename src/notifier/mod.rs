pub mod telegram;

use crate::model::{Listing, NotifyError, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use telegram::TelegramNotifier;

/// Delivers matched listings and account reminders to users.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_listing(
        &self,
        user_id: UserId,
        title: &str,
        listing: &Listing,
    ) -> Result<(), NotifyError>;

    /// Warns that the subscription ends at `expires_at`.
    async fn notify_expiring(
        &self,
        user_id: UserId,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), NotifyError>;
}
