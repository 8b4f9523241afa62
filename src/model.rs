// Core structs: listings, dimensions, filters and the error taxonomy
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Remote listing id; doubles as the catalog primary key.
pub type ListingId = i64;
pub type DimensionId = i64;
pub type FilterId = i64;
pub type UserId = i64;

/// Scope id used for dimension kinds without a parent.
pub const ROOT_SCOPE: DimensionId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    Manufacturer,
    Model,
    Series,
    Trim,
    EngineType,
    DriveType,
    Color,
}

impl DimensionKind {
    pub const ALL: [DimensionKind; 7] = [
        DimensionKind::Manufacturer,
        DimensionKind::Model,
        DimensionKind::Series,
        DimensionKind::Trim,
        DimensionKind::EngineType,
        DimensionKind::DriveType,
        DimensionKind::Color,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionKind::Manufacturer => "manufacturer",
            DimensionKind::Model => "model",
            DimensionKind::Series => "series",
            DimensionKind::Trim => "trim",
            DimensionKind::EngineType => "engine_type",
            DimensionKind::DriveType => "drive_type",
            DimensionKind::Color => "color",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == value)
    }

    /// The kind whose id scopes this one, if any.
    pub fn parent(&self) -> Option<DimensionKind> {
        match self {
            DimensionKind::Model => Some(DimensionKind::Manufacturer),
            DimensionKind::Series => Some(DimensionKind::Model),
            DimensionKind::Trim => Some(DimensionKind::Series),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub id: DimensionId,
    pub kind: DimensionKind,
    pub parent_id: DimensionId,
    pub name: String,
    pub translated: String,
}

/// One entry of a remote search page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingSummary {
    pub id: ListingId,
    pub manufacturer: Option<String>,
    pub model_group: Option<String>,
    pub model: Option<String>,
    pub badge: Option<String>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub color: Option<String>,
    pub year: Option<String>,
    pub mileage: Option<i64>,
    /// Asking price in units of 10,000 of the source currency.
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleDetail {
    pub vehicle_no: String,
    pub manufacturer_name: Option<String>,
    pub model_name: Option<String>,
    pub grade_name: Option<String>,
    pub year_month: Option<String>,
    pub fuel_name: Option<String>,
    pub color_name: Option<String>,
    pub mileage: Option<i64>,
    pub first_advertised_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccidentRecord {
    pub reg_date: Option<String>,
    pub owner_changes: Option<i64>,
    pub accidents_total: Option<i64>,
    pub accidents_own: Option<i64>,
    pub accidents_other: Option<i64>,
    pub repair_cost_own: Option<f64>,
    pub repair_cost_other: Option<f64>,
    pub theft_count: i64,
    pub flood_count: i64,
    pub total_loss_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DimensionIds {
    pub manufacturer: DimensionId,
    pub model: DimensionId,
    pub series: DimensionId,
    pub trim: Option<DimensionId>,
    pub engine_type: Option<DimensionId>,
    pub drive_type: Option<DimensionId>,
    pub color: Option<DimensionId>,
}

/// A canonical catalog row.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub external_id: ListingId,
    pub dimensions: DimensionIds,
    pub mileage: Option<i64>,
    pub price_source: i64,
    pub price_converted: Option<i64>,
    pub release_date: Option<NaiveDate>,
    pub published_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub ownership_changes: Option<i64>,
    pub accidents_total: Option<i64>,
    pub accidents_own: Option<i64>,
    pub accidents_other: Option<i64>,
    pub repair_cost_own: Option<f64>,
    pub repair_cost_other: Option<f64>,
    pub theft: bool,
    pub flood: bool,
    pub total_loss: bool,
    pub url: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// The external id was already stored; treated as success.
    AlreadyPresent,
}

/// Saved search predicates. `None` is a wildcard; ranges are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterPredicates {
    pub manufacturer_id: Option<DimensionId>,
    pub model_id: Option<DimensionId>,
    pub series_id: Option<DimensionId>,
    pub trim_id: Option<DimensionId>,
    pub engine_type_id: Option<DimensionId>,
    pub drive_type_id: Option<DimensionId>,
    pub color_id: Option<DimensionId>,
    pub mileage_from: Option<i64>,
    pub mileage_to: Option<i64>,
    pub price_from: Option<i64>,
    pub price_to: Option<i64>,
    pub release_from: Option<NaiveDate>,
    pub release_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub id: FilterId,
    pub user_id: UserId,
    pub predicates: FilterPredicates,
    pub created_at: DateTime<Utc>,
}

/// Partial filter update. The outer `Option` selects the field, the inner
/// one is the new value (`None` clears the predicate).
#[derive(Debug, Clone, Default)]
pub struct FilterUpdate {
    pub manufacturer_id: Option<Option<DimensionId>>,
    pub model_id: Option<Option<DimensionId>>,
    pub series_id: Option<Option<DimensionId>>,
    pub trim_id: Option<Option<DimensionId>>,
    pub engine_type_id: Option<Option<DimensionId>>,
    pub drive_type_id: Option<Option<DimensionId>>,
    pub color_id: Option<Option<DimensionId>>,
    pub mileage_from: Option<Option<i64>>,
    pub mileage_to: Option<Option<i64>>,
    pub price_from: Option<Option<i64>>,
    pub price_to: Option<Option<i64>>,
    pub release_from: Option<Option<NaiveDate>>,
    pub release_to: Option<Option<NaiveDate>>,
}

impl FilterUpdate {
    pub fn apply(&self, p: &mut FilterPredicates) {
        fn set<T: Copy>(slot: &mut Option<T>, change: Option<Option<T>>) {
            if let Some(value) = change {
                *slot = value;
            }
        }
        set(&mut p.manufacturer_id, self.manufacturer_id);
        set(&mut p.model_id, self.model_id);
        set(&mut p.series_id, self.series_id);
        set(&mut p.trim_id, self.trim_id);
        set(&mut p.engine_type_id, self.engine_type_id);
        set(&mut p.drive_type_id, self.drive_type_id);
        set(&mut p.color_id, self.color_id);
        set(&mut p.mileage_from, self.mileage_from);
        set(&mut p.mileage_to, self.mileage_to);
        set(&mut p.price_from, self.price_from);
        set(&mut p.price_to, self.price_to);
        set(&mut p.release_from, self.release_from);
        set(&mut p.release_to, self.release_to);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Any matching listing the filter has not seen yet.
    Unviewed,
    /// Only listings cataloged after the filter was created.
    NewSinceFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub filter_quota: i64,
}

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("no valid session: {0}")]
    SessionUnavailable(String),
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ScraperError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ScraperError::Timeout
        } else {
            ScraperError::RemoteUnavailable(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for ParserError {
    fn from(e: serde_json::Error) -> Self {
        ParserError::Malformed(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(String),
    #[error("record not found")]
    NotFound,
    #[error("filter quota exceeded for user {0}")]
    QuotaExceeded(UserId),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::DatabaseError(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier api error: {0}")]
    ApiError(String),
    #[error("notifier unreachable")]
    Unreachable,
}

/// Why a single listing was not stored. Never aborts the batch.
#[derive(Debug, Error)]
pub enum ItemFailure {
    #[error(transparent)]
    Remote(#[from] ScraperError),
    #[error("unparseable payload: {0}")]
    Parse(String),
    #[error("missing mandatory field: {0}")]
    MissingMandatoryField(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ParserError> for ItemFailure {
    fn from(e: ParserError) -> Self {
        match e {
            ParserError::MissingField(field) => ItemFailure::MissingMandatoryField(field),
            ParserError::Malformed(msg) => ItemFailure::Parse(msg),
        }
    }
}
