use crate::config::ScraperConfig;
use crate::model::{AccidentRecord, ItemFailure, ListingId, ListingSummary, VehicleDetail};
use crate::parser::{parse_accident, parse_detail};
use crate::scraper::traits::Transport;
use crate::storage::SqliteStorage;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const DETAIL_INCLUDE: &str =
    "ADVERTISEMENT,CATEGORY,CONDITION,CONTACT,MANAGE,OPTIONS,PHOTOS,SPEC,PARTNERSHIP,CENTER,VIEW";

#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// Stored by an earlier run or a concurrent task; no remote calls made.
    AlreadyStored,
    Fresh {
        detail: VehicleDetail,
        accident: AccidentRecord,
    },
}

pub struct DetailFetcher {
    transport: Arc<dyn Transport>,
    storage: Arc<Mutex<SqliteStorage>>,
    api_base: String,
}

impl DetailFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<Mutex<SqliteStorage>>,
        config: &ScraperConfig,
    ) -> Self {
        Self {
            transport,
            storage,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Detail then accident history. The second call needs the registration
    /// number from the first.
    pub async fn fetch(&self, summary: &ListingSummary) -> Result<Fetched, ItemFailure> {
        let exists = self.storage.lock().await.listing_exists(summary.id)?;
        if exists {
            debug!("Listing {} already stored, skipping detail", summary.id);
            return Ok(Fetched::AlreadyStored);
        }

        let detail = self.fetch_detail(summary.id).await?;
        let accident = self.fetch_accident(summary.id, &detail.vehicle_no).await?;
        Ok(Fetched::Fresh { detail, accident })
    }

    async fn fetch_detail(&self, id: ListingId) -> Result<VehicleDetail, ItemFailure> {
        let url = format!("{}/v1/readside/vehicle/{}", self.api_base, id);
        let body = self
            .transport
            .get(&url, &[("include", DETAIL_INCLUDE.to_string())])
            .await?;
        Ok(parse_detail(&body)?)
    }

    async fn fetch_accident(
        &self,
        id: ListingId,
        vehicle_no: &str,
    ) -> Result<AccidentRecord, ItemFailure> {
        let url = format!("{}/v1/readside/record/vehicle/{}/open", self.api_base, id);
        let body = self
            .transport
            .get(&url, &[("vehicleNo", vehicle_no.to_string())])
            .await?;
        Ok(parse_accident(&body)?)
    }
}
