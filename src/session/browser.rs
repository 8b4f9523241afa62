// Headless Chromium warm-up, for when plain HTTP gets challenged
use super::provider::{session_headers, SessionMaterial, SessionProvider};
use super::SessionError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use reqwest::Url;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

pub struct BrowserProvider {
    user_agent: String,
}

impl BrowserProvider {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

fn cdp_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Provider(e.to_string())
}

#[async_trait]
impl SessionProvider for BrowserProvider {
    async fn capture(&self, warmup_url: &str, dwell: Duration) -> Result<SessionMaterial, SessionError> {
        let url = Url::parse(warmup_url).map_err(cdp_error)?;
        let config = BrowserConfig::builder()
            .arg(format!("--user-agent={}", self.user_agent))
            .build()
            .map_err(SessionError::Provider)?;
        let (mut browser, mut handler) = Browser::launch(config).await.map_err(cdp_error)?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let captured = async {
            let page = browser.new_page(warmup_url).await.map_err(cdp_error)?;
            sleep(dwell).await;
            let cookies = page.get_cookies().await.map_err(cdp_error)?;
            if let Err(e) = page.close().await {
                warn!("Failed to close warm-up page: {}", e);
            }
            Ok::<_, SessionError>(
                cookies
                    .into_iter()
                    .map(|c| (c.name, c.value))
                    .collect::<BTreeMap<_, _>>(),
            )
        }
        .await;

        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        handler_task.abort();

        let cookies = captured?;
        if cookies.is_empty() {
            return Err(SessionError::Blocked("browser received no cookies".into()));
        }
        info!("Browser warm-up issued {} cookies", cookies.len());
        Ok(SessionMaterial {
            cookies,
            headers: session_headers(&url, &self.user_agent),
        })
    }
}
