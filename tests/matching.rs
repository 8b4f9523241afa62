mod common;

use car_sniper::matcher::{Delivery, MatchEngine, MatchError};
use car_sniper::model::{DeliveryMode, FilterPredicates, Subscription};
use car_sniper::storage::SqliteStorage;
use chrono::{Duration, Utc};
use common::*;
use std::sync::Arc;
use tokio::sync::Mutex;

fn engine(storage: Arc<Mutex<SqliteStorage>>, notifier: Arc<RecordingNotifier>) -> MatchEngine {
    MatchEngine::new(storage, notifier)
}

fn delivered_ids(delivery: Delivery) -> Vec<i64> {
    match delivery {
        Delivery::Delivered(listings) => listings.iter().map(|l| l.external_id).collect(),
        Delivery::NothingNew => Vec::new(),
    }
}

#[tokio::test]
async fn wildcard_filter_matches_every_listing() {
    let storage = memory_storage();
    let now = Utc::now();
    let filter = {
        let s = storage.lock().await;
        for (i, id) in [1, 2, 3].into_iter().enumerate() {
            s.insert_listing(&listing(id, dims(id), 10_000 * id, now - Duration::minutes(i as i64)))
                .unwrap();
        }
        subscribe(&s, 10, 5);
        s.create_filter(10, &FilterPredicates::default(), now).unwrap()
    };

    let engine = engine(storage, Arc::new(RecordingNotifier::default()));
    let delivery = engine
        .deliver_for_filter(10, filter.id, 10, DeliveryMode::Unviewed)
        .await
        .unwrap();
    // newest first
    assert_eq!(delivered_ids(delivery), vec![1, 2, 3]);
}

#[tokio::test]
async fn mileage_range_is_inclusive() {
    let storage = memory_storage();
    let now = Utc::now();
    let filter = {
        let s = storage.lock().await;
        for (id, mileage) in [(1, 40_000), (2, 50_000), (3, 75_000), (4, 100_000), (5, 100_001)] {
            s.insert_listing(&listing(id, dims(1), mileage, now - Duration::hours(id)))
                .unwrap();
        }
        subscribe(&s, 10, 5);
        s.create_filter(
            10,
            &FilterPredicates {
                mileage_from: Some(50_000),
                mileage_to: Some(100_000),
                ..Default::default()
            },
            now,
        )
        .unwrap()
    };

    let engine = engine(storage, Arc::new(RecordingNotifier::default()));
    let mut ids = delivered_ids(
        engine
            .deliver_for_filter(10, filter.id, 10, DeliveryMode::Unviewed)
            .await
            .unwrap(),
    );
    ids.sort();
    assert_eq!(ids, vec![2, 3, 4]);
}

#[tokio::test]
async fn listing_older_than_filter_only_in_unviewed_mode() {
    let storage = memory_storage();
    let t = Utc::now();
    let (new_only, any) = {
        let s = storage.lock().await;
        s.insert_listing(&listing(1, dims(7), 60_000, t - Duration::seconds(1)))
            .unwrap();
        s.insert_listing(&listing(2, dims(8), 60_000, t + Duration::seconds(1)))
            .unwrap();
        subscribe(&s, 10, 5);
        let predicates = FilterPredicates {
            manufacturer_id: Some(7),
            ..Default::default()
        };
        (
            s.create_filter(10, &predicates, t).unwrap(),
            s.create_filter(10, &predicates, t).unwrap(),
        )
    };

    let engine = engine(storage, Arc::new(RecordingNotifier::default()));
    let fresh = engine
        .deliver_for_filter(10, new_only.id, 5, DeliveryMode::NewSinceFilter)
        .await
        .unwrap();
    assert_eq!(fresh, Delivery::NothingNew);

    let all = engine
        .deliver_for_filter(10, any.id, 5, DeliveryMode::Unviewed)
        .await
        .unwrap();
    assert_eq!(delivered_ids(all), vec![1]);
}

#[tokio::test]
async fn delivered_listing_is_never_returned_again() {
    let storage = memory_storage();
    let now = Utc::now();
    let filter = {
        let s = storage.lock().await;
        for id in 1..=3 {
            s.insert_listing(&listing(id, dims(1), 1_000, now - Duration::minutes(id)))
                .unwrap();
        }
        subscribe(&s, 10, 5);
        s.create_filter(10, &FilterPredicates::default(), now).unwrap()
    };

    let engine = engine(storage.clone(), Arc::new(RecordingNotifier::default()));
    let first = engine
        .deliver_for_filter(10, filter.id, 2, DeliveryMode::Unviewed)
        .await
        .unwrap();
    assert_eq!(delivered_ids(first), vec![1, 2]);
    assert!(storage.lock().await.is_viewed(10, filter.id, 1).unwrap());

    let second = engine
        .deliver_for_filter(10, filter.id, 2, DeliveryMode::Unviewed)
        .await
        .unwrap();
    assert_eq!(delivered_ids(second), vec![3]);

    let third = engine
        .deliver_for_filter(10, filter.id, 2, DeliveryMode::Unviewed)
        .await
        .unwrap();
    assert_eq!(third, Delivery::NothingNew);
}

#[tokio::test]
async fn foreign_or_unknown_filter_is_not_found() {
    let storage = memory_storage();
    let filter = {
        let s = storage.lock().await;
        subscribe(&s, 10, 5);
        s.create_filter(10, &FilterPredicates::default(), Utc::now()).unwrap()
    };

    let engine = engine(storage, Arc::new(RecordingNotifier::default()));
    let err = engine
        .deliver_for_filter(11, filter.id, 1, DeliveryMode::Unviewed)
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::FilterNotFound(id) if id == filter.id));
    assert!(matches!(
        engine.deliver_for_filter(10, 9999, 1, DeliveryMode::Unviewed).await,
        Err(MatchError::FilterNotFound(9999))
    ));
}

#[tokio::test]
async fn sweep_notifies_once_per_filter_and_prunes_lapsed_users() {
    let storage = memory_storage();
    let t = Utc::now() - Duration::hours(1);
    let (kept, _lapsed) = {
        let s = storage.lock().await;
        subscribe(&s, 10, 5);
        subscribe(&s, 20, 5);
        let kept = s.create_filter(10, &FilterPredicates::default(), t).unwrap();
        let lapsed = s.create_filter(20, &FilterPredicates::default(), t).unwrap();
        s.upsert_subscription(&Subscription {
            user_id: 20,
            expires_at: Utc::now() - Duration::minutes(1),
            filter_quota: 5,
        })
        .unwrap();
        s.insert_listing(&listing(1, dims(1), 1_000, t + Duration::minutes(1)))
            .unwrap();
        s.insert_listing(&listing(2, dims(1), 1_000, t + Duration::minutes(2)))
            .unwrap();
        (kept, lapsed)
    };

    let notifier = Arc::new(RecordingNotifier::default());
    let engine = engine(storage.clone(), notifier.clone());

    let report = engine.sweep_new_matches().await.unwrap();
    assert_eq!(report.pruned_filters, 1);
    assert_eq!(report.filters_checked, 1);
    assert_eq!(report.delivered, 1);
    {
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!((sent[0].0, sent[0].1), (10, 2));
    }

    let again = engine.sweep_new_matches().await.unwrap();
    assert_eq!(again.delivered, 1);
    assert_eq!(notifier.sent.lock().unwrap()[1].1, 1);
    assert_eq!(storage.lock().await.get_all_filters().unwrap()[0].id, kept.id);
}

#[tokio::test]
async fn failed_notification_keeps_the_viewed_mark() {
    let storage = memory_storage();
    let t = Utc::now() - Duration::hours(1);
    let filter = {
        let s = storage.lock().await;
        subscribe(&s, 10, 5);
        let filter = s.create_filter(10, &FilterPredicates::default(), t).unwrap();
        s.insert_listing(&listing(1, dims(1), 1_000, Utc::now())).unwrap();
        filter
    };

    let notifier = Arc::new(RecordingNotifier {
        fail: true,
        ..Default::default()
    });
    let engine = engine(storage.clone(), notifier);
    let report = engine.sweep_new_matches().await.unwrap();
    assert_eq!(report.notify_failures, 1);
    assert_eq!(report.delivered, 0);
    assert!(storage.lock().await.is_viewed(10, filter.id, 1).unwrap());

    let retry = engine.sweep_new_matches().await.unwrap();
    assert_eq!(retry.notify_failures, 0);
}
