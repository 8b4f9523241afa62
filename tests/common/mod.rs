#![allow(dead_code)]

use async_trait::async_trait;
use car_sniper::config::{CategoryConfig, ScraperConfig, TransportKind};
use car_sniper::exchange::{FixedRate, RateSource};
use car_sniper::model::{
    DimensionIds, Listing, ListingId, NotifyError, ScraperError, Subscription, UserId,
};
use car_sniper::notifier::Notifier;
use car_sniper::pipeline::Crawler;
use car_sniper::scraper::Transport;
use car_sniper::storage::SqliteStorage;
use car_sniper::translate::{TranslationError, TranslationProvider};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const API: &str = "https://api.test";

/// Scripted remote catalog: search pages by offset, details and accident
/// records by id.
#[derive(Default)]
pub struct FakeEncar {
    pub pages: Vec<Vec<ListingId>>,
    pub without_vehicle_no: HashSet<ListingId>,
    pub without_price: HashSet<ListingId>,
    /// Zero-based search pages answered with a transport error.
    pub failing_pages: HashSet<usize>,
    /// Per-request latency, so concurrent requests overlap.
    pub latency_ms: u64,
    pub calls: std::sync::Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl FakeEncar {
    pub fn with_pages(pages: Vec<Vec<ListingId>>) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    pub fn detail_calls(&self) -> Vec<ListingId> {
        let prefix = format!("{}/v1/readside/vehicle/", API);
        let mut ids: Vec<ListingId> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|url| url.strip_prefix(&prefix)?.parse().ok())
            .collect();
        ids.sort();
        ids
    }

    pub fn search_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with("/search/car/list/mobile"))
            .count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn search_body(&self, query: &[(&str, String)]) -> Result<String, ScraperError> {
        let sr = query
            .iter()
            .find(|(k, _)| *k == "sr")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        let parts: Vec<&str> = sr.split('|').collect();
        let offset: usize = parts[2].parse().unwrap();
        let size: usize = parts[3].parse().unwrap();
        if self.failing_pages.contains(&(offset / size)) {
            return Err(ScraperError::RemoteUnavailable("HTTP 502".into()));
        }
        let ids = self.pages.get(offset / size).cloned().unwrap_or_default();

        let results: Vec<_> = ids
            .iter()
            .map(|id| {
                let (maker, model) = if id % 2 == 0 { ("현대", "아반떼") } else { ("기아", "K5") };
                let price = if self.without_price.contains(id) {
                    serde_json::Value::Null
                } else {
                    json!(1890.0)
                };
                json!({
                    "Id": id.to_string(),
                    "Manufacturer": maker,
                    "ModelGroup": model,
                    "Model": format!("{} 2세대", model),
                    "Badge": "1.6 Smart",
                    "FuelType": "가솔린",
                    "Transmission": "오토",
                    "Color": "흰색",
                    "Year": 202103.0,
                    "Mileage": (id * 1000) as f64,
                    "Price": price,
                })
            })
            .collect();
        Ok(json!({ "Count": results.len(), "SearchResults": results }).to_string())
    }

    fn respond(&self, url: &str, query: &[(&str, String)]) -> Result<String, ScraperError> {
        if url.ends_with("/search/car/list/mobile") {
            return self.search_body(query);
        }
        if let Some(id) = url.strip_prefix(&format!("{}/v1/readside/vehicle/", API)) {
            let id: ListingId = id
                .parse()
                .map_err(|_| ScraperError::InvalidResponse(url.to_string()))?;
            if self.without_vehicle_no.contains(&id) {
                return Ok(json!({ "category": {} }).to_string());
            }
            return Ok(json!({
                "vehicleNo": format!("{}가{}", id % 100, id),
                "category": { "yearMonth": "202103" },
                "spec": { "mileage": id * 1000 },
                "manage": { "firstAdvertisedDateTime": "2024-05-01T10:20:30.123" }
            })
            .to_string());
        }
        if url.starts_with(&format!("{}/v1/readside/record/vehicle/", API)) {
            return Ok(json!({
                "regDate": "2024-05-02T00:00:00",
                "ownerChangeCnt": 1,
                "accidentCnt": 0,
                "robberCnt": 0,
                "floodTotalLossCnt": 0,
                "totalLossCnt": 0
            })
            .to_string());
        }
        Err(ScraperError::RemoteUnavailable(format!("unexpected url {}", url)))
    }
}

#[async_trait]
impl Transport for FakeEncar {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, ScraperError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
        let response = self.respond(url, query);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Prefixes the label with "tr"; fails for labels containing "실패".
pub struct FakeTranslator;

#[async_trait]
impl TranslationProvider for FakeTranslator {
    async fn translate(&self, text: &str, _context: &str) -> Result<String, TranslationError> {
        if text.contains("실패") {
            return Err(TranslationError::Http("HTTP 500".into()));
        }
        Ok(format!("tr {}", text))
    }
}

pub struct FailingRate;

#[async_trait]
impl RateSource for FailingRate {
    async fn current_rate(&self) -> Result<f64, ScraperError> {
        Err(ScraperError::RemoteUnavailable("rates down".into()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub sent: std::sync::Mutex<Vec<(UserId, ListingId, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_listing(
        &self,
        user_id: UserId,
        title: &str,
        listing: &Listing,
    ) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Unreachable);
        }
        self.sent
            .lock()
            .unwrap()
            .push((user_id, listing.external_id, title.to_string()));
        Ok(())
    }

    async fn notify_expiring(
        &self,
        _user_id: UserId,
        _expires_at: DateTime<Utc>,
        _now: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Unreachable);
        }
        Ok(())
    }
}

pub fn scraper_config(page_size: u32) -> ScraperConfig {
    ScraperConfig {
        api_base: API.to_string(),
        page_size,
        page_delay_ms: 0,
        max_concurrent: 3,
        transport: TransportKind::Direct,
        ..Default::default()
    }
}

pub fn category() -> CategoryConfig {
    CategoryConfig {
        name: "kor".into(),
        query: "(And.Hidden.N._.CarType.A.)".into(),
    }
}

pub fn memory_storage() -> Arc<Mutex<SqliteStorage>> {
    Arc::new(Mutex::new(SqliteStorage::in_memory().unwrap()))
}

pub fn crawler(
    remote: Arc<FakeEncar>,
    storage: Arc<Mutex<SqliteStorage>>,
    page_size: u32,
) -> Crawler {
    Crawler::new(
        &scraper_config(page_size),
        remote,
        storage,
        Arc::new(FakeTranslator),
        Arc::new(FixedRate(0.06)),
    )
}

pub fn listing(
    id: ListingId,
    dimensions: DimensionIds,
    mileage: i64,
    created_at: DateTime<Utc>,
) -> Listing {
    Listing {
        external_id: id,
        dimensions,
        mileage: Some(mileage),
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
        created_at,
    }
}

pub fn dims(manufacturer: i64) -> DimensionIds {
    DimensionIds {
        manufacturer,
        model: 100 + manufacturer,
        series: 200 + manufacturer,
        ..Default::default()
    }
}

pub fn subscribe(storage: &SqliteStorage, user_id: UserId, quota: i64) {
    storage
        .upsert_subscription(&Subscription {
            user_id,
            expires_at: Utc::now() + Duration::days(30),
            filter_quota: quota,
        })
        .unwrap();
}
