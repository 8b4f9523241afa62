// Crawl run: page stream -> existing-id skip -> bounded detail fan-out -> catalog
use crate::catalog::{CatalogWriter, ListingParts};
use crate::config::{CategoryConfig, ScraperConfig};
use crate::exchange::RateSource;
use crate::model::{ItemFailure, ListingId, ListingSummary, ScraperError, StorageError, WriteOutcome};
use crate::resolver::EntityResolver;
use crate::scraper::{DetailFetcher, Fetched, ListingFetcher, Transport};
use crate::storage::SqliteStorage;
use crate::translate::TranslationProvider;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Failures that end a whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("exchange rate unavailable: {0}")]
    ExchangeRate(ScraperError),
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of processing one listing.
#[derive(Debug)]
pub enum ItemOutcome {
    Stored(ListingId),
    /// Another run or task stored it first.
    AlreadyPresent(ListingId),
    Failed { id: ListingId, reason: ItemFailure },
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub category: String,
    pub received: usize,
    pub skipped_existing: usize,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn stored(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Stored(_)))
    }

    pub fn already_present(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::AlreadyPresent(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed { .. }))
    }

    /// Ids that went through detail fetching.
    pub fn attempted_ids(&self) -> Vec<ListingId> {
        self.outcomes
            .iter()
            .map(|o| match o {
                ItemOutcome::Stored(id) | ItemOutcome::AlreadyPresent(id) => *id,
                ItemOutcome::Failed { id, .. } => *id,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

#[derive(Debug, Default)]
pub struct CrawlReport {
    pub exchange_rate: f64,
    pub pages: usize,
    pub received: usize,
    pub skipped_existing: usize,
    pub stored: usize,
    pub already_present: usize,
    pub failed: usize,
}

impl CrawlReport {
    fn absorb(&mut self, batch: &BatchReport) {
        self.pages += 1;
        self.received += batch.received;
        self.skipped_existing += batch.skipped_existing;
        self.stored += batch.stored();
        self.already_present += batch.already_present();
        self.failed += batch.failed();
    }
}

pub struct Crawler {
    transport: Arc<dyn Transport>,
    storage: Arc<Mutex<SqliteStorage>>,
    rates: Arc<dyn RateSource>,
    listings: ListingFetcher,
    details: DetailFetcher,
    resolver: EntityResolver,
    writer: CatalogWriter,
    page_size: u32,
    max_concurrent: usize,
}

impl Crawler {
    pub fn new(
        config: &ScraperConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<Mutex<SqliteStorage>>,
        translator: Arc<dyn TranslationProvider>,
        rates: Arc<dyn RateSource>,
    ) -> Self {
        Self {
            listings: ListingFetcher::new(transport.clone(), config),
            details: DetailFetcher::new(transport.clone(), storage.clone(), config),
            resolver: EntityResolver::new(storage.clone(), translator),
            writer: CatalogWriter::new(storage.clone(), &config.listing_url_base),
            transport,
            storage,
            rates,
            page_size: config.page_size.max(1),
            max_concurrent: config.max_concurrent.clamp(1, 20),
        }
    }

    /// Crawls every category once. Item failures are counted, not raised.
    pub async fn run_crawl(
        &self,
        categories: &[CategoryConfig],
        max_pages: Option<u32>,
    ) -> Result<CrawlReport, RunError> {
        let rate = self.rates.current_rate().await.map_err(|e| {
            error!("Cannot read exchange rate: {}", e);
            RunError::ExchangeRate(e)
        })?;
        self.transport.prepare().await.map_err(|e| {
            error!("Cannot prepare transport: {}", e);
            RunError::SessionUnavailable(e.to_string())
        })?;

        let mut report = CrawlReport {
            exchange_rate: rate,
            ..CrawlReport::default()
        };

        for category in categories {
            info!("🚗 Crawling category '{}'", category.name);
            let mut pages = pin!(self.listings.stream(category, self.page_size, max_pages));
            while let Some(summaries) = pages.next().await {
                let batch = self.process_batch(category, summaries, rate).await?;
                info!(
                    "[{}] page done: {} new, {} skipped, {} stored, {} failed",
                    category.name,
                    batch.outcomes.len(),
                    batch.skipped_existing,
                    batch.stored(),
                    batch.failed()
                );
                report.absorb(&batch);
            }
        }

        info!(
            "✅ Crawl finished: {} pages, {} stored, {} already present, {} failed",
            report.pages, report.stored, report.already_present, report.failed
        );
        Ok(report)
    }

    /// Drops ids already in the catalog, then fetches the rest with at most
    /// `max_concurrent` in flight.
    pub async fn process_batch(
        &self,
        category: &CategoryConfig,
        summaries: Vec<ListingSummary>,
        rate: f64,
    ) -> Result<BatchReport, RunError> {
        let received = summaries.len();
        let ids: Vec<ListingId> = summaries.iter().map(|s| s.id).collect();
        let existing = self.storage.lock().await.existing_ids(&ids)?;

        let mut seen = HashSet::new();
        let fresh: Vec<ListingSummary> = summaries
            .into_iter()
            .filter(|s| !existing.contains(&s.id) && seen.insert(s.id))
            .collect();
        let skipped_existing = received - fresh.len();

        let outcomes = stream::iter(fresh)
            .map(|summary| async move { self.process_item(category, &summary, rate).await })
            .buffer_unordered(self.max_concurrent)
            .collect::<Vec<_>>()
            .await;

        Ok(BatchReport {
            category: category.name.clone(),
            received,
            skipped_existing,
            outcomes,
        })
    }

    async fn process_item(
        &self,
        category: &CategoryConfig,
        summary: &ListingSummary,
        rate: f64,
    ) -> ItemOutcome {
        match self.store_item(category, summary, rate).await {
            Ok(WriteOutcome::Inserted) => ItemOutcome::Stored(summary.id),
            Ok(WriteOutcome::AlreadyPresent) => ItemOutcome::AlreadyPresent(summary.id),
            Err(reason) => {
                warn!("Listing {} skipped: {}", summary.id, reason);
                ItemOutcome::Failed {
                    id: summary.id,
                    reason,
                }
            }
        }
    }

    async fn store_item(
        &self,
        category: &CategoryConfig,
        summary: &ListingSummary,
        rate: f64,
    ) -> Result<WriteOutcome, ItemFailure> {
        let (detail, accident) = match self.details.fetch(summary).await? {
            Fetched::AlreadyStored => return Ok(WriteOutcome::AlreadyPresent),
            Fetched::Fresh { detail, accident } => (detail, accident),
        };
        let dimensions = self.resolver.resolve_all(summary, &detail).await?;
        let listing = self.writer.assemble(
            ListingParts {
                summary,
                detail: &detail,
                accident: &accident,
                dimensions,
                category: &category.name,
            },
            rate,
            Utc::now(),
        )?;
        self.writer.write(&listing).await
    }
}
