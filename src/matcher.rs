// Saved-filter matching and at-most-once delivery
use crate::model::{DeliveryMode, FilterId, Listing, StorageError, UserId};
use crate::notifier::Notifier;
use crate::storage::SqliteStorage;
use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("filter {0} not found for this user")]
    FilterNotFound(FilterId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    NothingNew,
    /// Listings now marked viewed for the (user, filter) pair.
    Delivered(Vec<Listing>),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub pruned_filters: usize,
    pub filters_checked: usize,
    pub delivered: usize,
    pub notify_failures: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReminderReport {
    pub reminded: usize,
    pub notify_failures: usize,
}

/// How far ahead a subscription end triggers a reminder.
pub const REMINDER_WINDOW_HOURS: i64 = 24;

pub struct MatchEngine {
    storage: Arc<Mutex<SqliteStorage>>,
    notifier: Arc<dyn Notifier>,
}

impl MatchEngine {
    pub fn new(storage: Arc<Mutex<SqliteStorage>>, notifier: Arc<dyn Notifier>) -> Self {
        Self { storage, notifier }
    }

    /// Returns up to `count` matching listings the filter has not seen and
    /// marks them viewed in the same transaction.
    pub async fn deliver_for_filter(
        &self,
        user_id: UserId,
        filter_id: FilterId,
        count: usize,
        mode: DeliveryMode,
    ) -> Result<Delivery, MatchError> {
        let mut storage = self.storage.lock().await;
        let filter = storage
            .get_filter(filter_id)?
            .filter(|f| f.user_id == user_id)
            .ok_or(MatchError::FilterNotFound(filter_id))?;
        if count == 0 {
            return Ok(Delivery::NothingNew);
        }

        let listings = storage.deliver(&filter, mode, count, Utc::now())?;
        Ok(if listings.is_empty() {
            Delivery::NothingNew
        } else {
            Delivery::Delivered(listings)
        })
    }

    /// Prunes filters by subscription, then pushes one fresh listing per
    /// filter to its owner. A failed notification keeps the viewed mark.
    pub async fn sweep_new_matches(&self) -> Result<SweepReport, MatchError> {
        let (pruned_filters, filters) = {
            let storage = self.storage.lock().await;
            (storage.prune_filters(Utc::now())?, storage.get_all_filters()?)
        };
        if pruned_filters > 0 {
            info!("🧹 Pruned {} filters outside subscription quota", pruned_filters);
        }

        let mut report = SweepReport {
            pruned_filters,
            filters_checked: filters.len(),
            ..SweepReport::default()
        };

        for filter in filters {
            let listings = match self
                .deliver_for_filter(filter.user_id, filter.id, 1, DeliveryMode::NewSinceFilter)
                .await
            {
                Ok(Delivery::Delivered(listings)) => listings,
                Ok(Delivery::NothingNew) => continue,
                Err(e) => {
                    warn!("Sweep skipped filter {}: {}", filter.id, e);
                    continue;
                }
            };

            for listing in listings {
                let title = match self.storage.lock().await.listing_title(&listing.dimensions) {
                    Ok(title) => title,
                    Err(e) => {
                        warn!("No title for listing {}: {}", listing.external_id, e);
                        String::new()
                    }
                };
                match self.notifier.notify_listing(filter.user_id, &title, &listing).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!(
                            "Notify user {} about listing {} failed: {}",
                            filter.user_id, listing.external_id, e
                        );
                        report.notify_failures += 1;
                    }
                }
            }
        }

        info!(
            "📬 Sweep done: {} filters, {} delivered, {} failed",
            report.filters_checked, report.delivered, report.notify_failures
        );
        Ok(report)
    }

    /// Reminds every user whose subscription ends within the next
    /// `REMINDER_WINDOW_HOURS`. Meant to run once per window.
    pub async fn remind_expiring_subscriptions(&self) -> Result<ReminderReport, MatchError> {
        let now = Utc::now();
        let expiring = self
            .storage
            .lock()
            .await
            .expiring_subscriptions(now, now + Duration::hours(REMINDER_WINDOW_HOURS))?;

        let mut report = ReminderReport::default();
        for subscription in expiring {
            match self
                .notifier
                .notify_expiring(subscription.user_id, subscription.expires_at, now)
                .await
            {
                Ok(()) => report.reminded += 1,
                Err(e) => {
                    warn!("Expiry reminder for user {} failed: {}", subscription.user_id, e);
                    report.notify_failures += 1;
                }
            }
        }
        if report.reminded > 0 {
            info!("⏰ Reminded {} users about expiring subscriptions", report.reminded);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DimensionIds, FilterPredicates, NotifyError, Subscription};
    use async_trait::async_trait;
    use chrono::DateTime;

    #[derive(Default)]
    struct Inbox {
        titles: std::sync::Mutex<Vec<String>>,
        reminded: std::sync::Mutex<Vec<UserId>>,
    }

    #[async_trait]
    impl Notifier for Inbox {
        async fn notify_listing(
            &self,
            _user_id: UserId,
            title: &str,
            _listing: &Listing,
        ) -> Result<(), NotifyError> {
            self.titles.lock().unwrap().push(title.to_string());
            Ok(())
        }

        async fn notify_expiring(
            &self,
            user_id: UserId,
            _expires_at: DateTime<Utc>,
            _now: DateTime<Utc>,
        ) -> Result<(), NotifyError> {
            self.reminded.lock().unwrap().push(user_id);
            Ok(())
        }
    }

    fn listing(id: i64) -> Listing {
        Listing {
            external_id: id,
            dimensions: DimensionIds {
                manufacturer: 1,
                model: 2,
                series: 3,
                ..Default::default()
            },
            mileage: Some(10_000),
            price_source: 18_900_000,
            price_converted: Some(1_134_000),
            release_date: None,
            published_at: None,
            verified_at: None,
            ownership_changes: None,
            accidents_total: None,
            accidents_own: None,
            accidents_other: None,
            repair_cost_own: None,
            repair_cost_other: None,
            theft: false,
            flood: false,
            total_loss: false,
            url: format!("https://fem.encar.com/cars/detail/{}", id),
            category: "kor".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn title_lookup_failure_still_notifies() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage
            .upsert_subscription(&Subscription {
                user_id: 5,
                expires_at: Utc::now() + Duration::days(1),
                filter_quota: 1,
            })
            .unwrap();
        storage
            .create_filter(5, &FilterPredicates::default(), Utc::now() - Duration::hours(1))
            .unwrap();
        storage.insert_listing(&listing(1)).unwrap();
        storage.conn.execute_batch("DROP TABLE dimensions").unwrap();

        let inbox = Arc::new(Inbox::default());
        let engine = MatchEngine::new(Arc::new(Mutex::new(storage)), inbox.clone());
        let report = engine.sweep_new_matches().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(*inbox.titles.lock().unwrap(), vec![String::new()]);
    }

    #[tokio::test]
    async fn reminds_only_subscriptions_ending_within_a_day() {
        let storage = SqliteStorage::in_memory().unwrap();
        for (user_id, hours) in [(1, 2), (2, 48), (3, -2)] {
            storage
                .upsert_subscription(&Subscription {
                    user_id,
                    expires_at: Utc::now() + Duration::hours(hours),
                    filter_quota: 1,
                })
                .unwrap();
        }

        let inbox = Arc::new(Inbox::default());
        let engine = MatchEngine::new(Arc::new(Mutex::new(storage)), inbox.clone());
        let report = engine.remind_expiring_subscriptions().await.unwrap();

        assert_eq!(report.reminded, 1);
        assert_eq!(*inbox.reminded.lock().unwrap(), vec![1]);
    }
}
