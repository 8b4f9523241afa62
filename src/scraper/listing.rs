use crate::config::{CategoryConfig, ScraperConfig};
use crate::model::{ListingSummary, ScraperError};
use crate::parser::{parse_search_page, SearchPage};
use crate::scraper::traits::Transport;
use futures::stream::{self, Stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Walks the remote search index page by page, newest modification first.
pub struct ListingFetcher {
    transport: Arc<dyn Transport>,
    api_base: String,
    page_delay: Duration,
}

impl ListingFetcher {
    pub fn new(transport: Arc<dyn Transport>, config: &ScraperConfig) -> Self {
        Self {
            transport,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            page_delay: Duration::from_millis(config.page_delay_ms),
        }
    }

    pub async fn fetch_page(
        &self,
        category: &CategoryConfig,
        offset: u32,
        size: u32,
    ) -> Result<SearchPage, ScraperError> {
        let url = format!("{}/search/car/list/mobile", self.api_base);
        let query = [
            ("count", "true".to_string()),
            ("q", category.query.clone()),
            ("sr", format!("|MobileModifiedDate|{}|{}", offset, size)),
            ("inav", "|Metadata|Sort".to_string()),
        ];
        let body = self.transport.get(&url, &query).await?;
        parse_search_page(&body).map_err(|e| ScraperError::InvalidResponse(e.to_string()))
    }

    /// Lazily yields one batch per remote page. The stream ends on an empty
    /// page, after `max_pages`, or on the first error.
    pub fn stream<'a>(
        &'a self,
        category: &'a CategoryConfig,
        page_size: u32,
        max_pages: Option<u32>,
    ) -> impl Stream<Item = Vec<ListingSummary>> + 'a {
        stream::unfold(0u32, move |page| async move {
            if max_pages.is_some_and(|max| page >= max) {
                info!("[{}] Page limit {} reached", category.name, page);
                return None;
            }
            if page > 0 && !self.page_delay.is_zero() {
                sleep(self.page_delay).await;
            }

            let offset = page.saturating_mul(page_size);
            match self.fetch_page(category, offset, page_size).await {
                Ok(result) if result.items.is_empty() => {
                    info!("[{}] Empty page at offset {}, done", category.name, offset);
                    None
                }
                Ok(result) => {
                    info!(
                        "📄 [{}] Page {} with {} listings (total {:?})",
                        category.name,
                        page + 1,
                        result.items.len(),
                        result.total
                    );
                    Some((result.items, page + 1))
                }
                Err(e) => {
                    warn!("[{}] Stopping at offset {}: {}", category.name, offset, e);
                    None
                }
            }
        })
    }
}
