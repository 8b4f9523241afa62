use super::SessionError;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, StatusCode, Url};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Raw session material returned by a provider, before it is timestamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMaterial {
    pub cookies: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

/// Drives a scripted visit to the warm-up page and extracts session material.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn capture(&self, warmup_url: &str, dwell: Duration) -> Result<SessionMaterial, SessionError>;
}

/// Warm-up over plain HTTP with a cookie jar.
pub struct HttpWarmupProvider {
    user_agent: String,
    timeout: Duration,
}

impl HttpWarmupProvider {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SessionProvider for HttpWarmupProvider {
    async fn capture(&self, warmup_url: &str, dwell: Duration) -> Result<SessionMaterial, SessionError> {
        let url = Url::parse(warmup_url).map_err(|e| SessionError::Provider(e.to_string()))?;
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()?;

        let response = client.get(url.clone()).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Warm-up page answered {}", status);
            return Err(SessionError::Blocked(format!("status {}", status)));
        }
        if body.to_lowercase().contains("recaptcha") {
            return Err(SessionError::Blocked("captcha challenge".into()));
        }
        if !status.is_success() {
            return Err(SessionError::Provider(format!("warm-up status {}", status)));
        }

        sleep(dwell).await;

        let cookies = jar
            .cookies(&url)
            .and_then(|value| value.to_str().ok().map(parse_cookie_header))
            .unwrap_or_default();
        if cookies.is_empty() {
            return Err(SessionError::Blocked("no cookies issued".into()));
        }
        info!("Warm-up issued {} cookies", cookies.len());

        Ok(SessionMaterial {
            cookies,
            headers: session_headers(&url, &self.user_agent),
        })
    }
}

/// Headers replayed with every API request so it looks like the warm-up browser.
pub fn session_headers(warmup: &Url, user_agent: &str) -> BTreeMap<String, String> {
    let origin = warmup.origin().ascii_serialization();
    let mut headers = BTreeMap::new();
    headers.insert("User-Agent".to_string(), user_agent.to_string());
    headers.insert("Referer".to_string(), format!("{}/", origin));
    headers.insert("Origin".to_string(), origin);
    headers.insert("Accept".to_string(), "application/json, text/plain, */*".to_string());
    headers
}

/// Splits a `name=value; name2=value2` header into pairs.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cookie_pairs() {
        let cookies = parse_cookie_header("PCID=17; WMONID=ab=c ; =x; junk");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies["PCID"], "17");
        assert_eq!(cookies["WMONID"], "ab=c");
    }

    #[test]
    fn headers_follow_warmup_origin() {
        let url = Url::parse("https://car.encar.com/list/car?page=1").unwrap();
        let headers = session_headers(&url, "UA");
        assert_eq!(headers["Referer"], "https://car.encar.com/");
        assert_eq!(headers["Origin"], "https://car.encar.com");
        assert_eq!(headers["User-Agent"], "UA");
    }

    #[tokio::test]
    async fn warmup_collects_cookies() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/list/car")
            .with_status(200)
            .with_header("set-cookie", "PCID=42; Path=/")
            .with_body("<html>ok</html>")
            .create_async()
            .await;

        let provider = HttpWarmupProvider::new("UA", Duration::from_secs(5));
        let material = provider
            .capture(&format!("{}/list/car", server.url()), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(material.cookies["PCID"], "42");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn forbidden_warmup_is_blocked() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/list/car")
            .with_status(403)
            .create_async()
            .await;

        let provider = HttpWarmupProvider::new("UA", Duration::from_secs(5));
        let err = provider
            .capture(&format!("{}/list/car", server.url()), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Blocked(_)));
    }
}
