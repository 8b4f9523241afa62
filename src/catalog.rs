use crate::model::{
    AccidentRecord, DimensionIds, ItemFailure, Listing, ListingSummary, VehicleDetail,
    WriteOutcome,
};
use crate::storage::SqliteStorage;
use crate::utils::{parse_datetime, parse_release_date};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Source prices are quoted in units of 10,000.
pub const PRICE_UNIT: f64 = 10_000.0;

/// Everything needed to build one catalog row.
pub struct ListingParts<'a> {
    pub summary: &'a ListingSummary,
    pub detail: &'a VehicleDetail,
    pub accident: &'a AccidentRecord,
    pub dimensions: DimensionIds,
    pub category: &'a str,
}

pub struct CatalogWriter {
    storage: Arc<Mutex<SqliteStorage>>,
    listing_url_base: String,
}

impl CatalogWriter {
    pub fn new(storage: Arc<Mutex<SqliteStorage>>, listing_url_base: &str) -> Self {
        Self {
            storage,
            listing_url_base: listing_url_base.trim_end_matches('/').to_string(),
        }
    }

    /// Builds the canonical row. Fails only when the price is missing.
    pub fn assemble(
        &self,
        parts: ListingParts<'_>,
        exchange_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<Listing, ItemFailure> {
        let ListingParts {
            summary,
            detail,
            accident,
            dimensions,
            category,
        } = parts;

        let price = summary
            .price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or(ItemFailure::MissingMandatoryField("price"))?;
        let price_source = (price * PRICE_UNIT).round() as i64;
        let price_converted =
            (exchange_rate.is_finite() && exchange_rate > 0.0)
                .then(|| (price_source as f64 * exchange_rate).floor() as i64);

        let release_date = summary
            .year
            .as_deref()
            .and_then(parse_release_date)
            .or_else(|| detail.year_month.as_deref().and_then(parse_release_date));

        Ok(Listing {
            external_id: summary.id,
            dimensions,
            mileage: summary.mileage.or(detail.mileage),
            price_source,
            price_converted,
            release_date,
            published_at: detail.first_advertised_at.as_deref().and_then(parse_datetime),
            verified_at: accident.reg_date.as_deref().and_then(parse_datetime),
            ownership_changes: accident.owner_changes,
            accidents_total: accident.accidents_total,
            accidents_own: accident.accidents_own,
            accidents_other: accident.accidents_other,
            repair_cost_own: accident.repair_cost_own,
            repair_cost_other: accident.repair_cost_other,
            theft: accident.theft_count > 0,
            flood: accident.flood_count > 0,
            total_loss: accident.total_loss_count > 0,
            url: format!("{}/{}", self.listing_url_base, summary.id),
            category: category.to_string(),
            created_at: now,
        })
    }

    pub async fn write(&self, listing: &Listing) -> Result<WriteOutcome, ItemFailure> {
        Ok(self.storage.lock().await.insert_listing(listing)?)
    }
}
