use crate::model::ScraperError;

/// How remote API requests leave the process.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// GETs `url` with the query pairs and returns the response body.
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, ScraperError>;

    /// Called once before a crawl run; a transport that needs session
    /// material acquires it here.
    async fn prepare(&self) -> Result<(), ScraperError> {
        Ok(())
    }
}
