use crate::config::{ScraperConfig, TransportKind};
use crate::model::ScraperError;
use crate::scraper::traits::Transport;
use crate::session::SessionManager;
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub fn build_client(config: &ScraperConfig) -> Result<Client, ScraperError> {
    Ok(Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.request_timeout_seconds))
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

/// Picks the transport strategy named in configuration.
pub fn build_transport(
    config: &ScraperConfig,
    session: Arc<SessionManager>,
) -> Result<Arc<dyn Transport>, ScraperError> {
    let client = build_client(config)?;
    Ok(match config.transport {
        TransportKind::Direct => Arc::new(DirectTransport::new(client)),
        TransportKind::Session => Arc::new(SessionTransport::new(client, session)),
    })
}

async fn send(request: RequestBuilder, url: &str) -> Result<String, ScraperError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        warn!("❌ {} answered {}", url, status);
        return Err(ScraperError::RemoteUnavailable(format!("status {} from {}", status, url)));
    }
    let body = response.text().await?;
    debug!("{} -> {} bytes", url, body.len());
    Ok(body)
}

/// Plain requests, no session material.
pub struct DirectTransport {
    client: Client,
}

impl DirectTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for DirectTransport {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, ScraperError> {
        send(self.client.get(url).query(query), url).await
    }
}

/// Requests carrying the cookies and headers of the current session.
pub struct SessionTransport {
    client: Client,
    session: Arc<SessionManager>,
}

impl SessionTransport {
    pub fn new(client: Client, session: Arc<SessionManager>) -> Self {
        Self { client, session }
    }
}

#[async_trait::async_trait]
impl Transport for SessionTransport {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, ScraperError> {
        let bundle = self
            .session
            .current()
            .await
            .ok_or_else(|| ScraperError::SessionUnavailable("session expired".into()))?;

        let mut request = self
            .client
            .get(url)
            .query(query)
            .header(COOKIE, bundle.cookie_header());
        for (name, value) in &bundle.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        send(request, url).await
    }

    async fn prepare(&self) -> Result<(), ScraperError> {
        self.session
            .load_with_retry()
            .await
            .map(|_| ())
            .map_err(|e| ScraperError::SessionUnavailable(e.to_string()))
    }
}
