// Anti-bot session material: capture, persistence and TTL handling
pub mod provider;

#[cfg(feature = "browser")]
pub mod browser;

use crate::config::SessionConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub use provider::{HttpWarmupProvider, SessionMaterial, SessionProvider};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("warm-up page blocked the session: {0}")]
    Blocked(String),
    #[error("session provider failed: {0}")]
    Provider(String),
    #[error("session blob io: {0}")]
    Io(#[from] std::io::Error),
    #[error("session blob format: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no session after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: String },
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        SessionError::Provider(e.to_string())
    }
}

/// Cookies and headers that let API calls pass the anti-bot layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionBundle {
    pub cookies: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

impl SessionBundle {
    /// Renders the cookies as a single `Cookie` header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn is_fresh(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.captured_at < ttl
    }
}

pub struct SessionManager {
    provider: Arc<dyn SessionProvider>,
    warmup_url: String,
    dwell: Duration,
    ttl: chrono::Duration,
    blob_path: PathBuf,
    max_attempts: u32,
    backoff_base: Duration,
    cached: RwLock<Option<SessionBundle>>,
    // held for the whole capture; loaders re-check the session under it
    refreshing: Mutex<()>,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn SessionProvider>, config: &SessionConfig) -> Self {
        Self {
            provider,
            warmup_url: config.warmup_url.clone(),
            dwell: Duration::from_secs(config.dwell_seconds),
            ttl: chrono::Duration::seconds(config.ttl_seconds as i64),
            blob_path: PathBuf::from(&config.blob_path),
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            cached: RwLock::new(None),
            refreshing: Mutex::new(()),
        }
    }

    /// Runs the provider against the warm-up page and persists the result.
    pub async fn refresh(&self) -> Result<SessionBundle, SessionError> {
        let _guard = self.refreshing.lock().await;
        self.capture().await
    }

    /// Returns the stored bundle when still within TTL, refreshing otherwise.
    /// Concurrent callers wait for a single in-flight warm-up.
    pub async fn load(&self) -> Result<SessionBundle, SessionError> {
        if let Some(bundle) = self.current().await {
            return Ok(bundle);
        }
        let _guard = self.refreshing.lock().await;
        if let Some(bundle) = self.current().await {
            debug!("Session captured by a concurrent caller");
            return Ok(bundle);
        }
        self.capture().await
    }

    // caller holds `refreshing`
    async fn capture(&self) -> Result<SessionBundle, SessionError> {
        info!("🍪 Refreshing session via {}", self.warmup_url);

        let material = self.provider.capture(&self.warmup_url, self.dwell).await?;
        let bundle = SessionBundle {
            cookies: material.cookies,
            headers: material.headers,
            captured_at: Utc::now(),
        };
        self.persist(&bundle).await?;
        *self.cached.write().await = Some(bundle.clone());

        info!("🍪 Session captured: {} cookies", bundle.cookies.len());
        Ok(bundle)
    }

    /// `load()` with exponential backoff and jitter between attempts.
    pub async fn load_with_retry(&self) -> Result<SessionBundle, SessionError> {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            match self.load().await {
                Ok(bundle) => return Ok(bundle),
                Err(e) => {
                    warn!("Session attempt {}/{} failed: {}", attempt, self.max_attempts, e);
                    last = e.to_string();
                }
            }
            if attempt < self.max_attempts {
                sleep(self.backoff_delay(attempt)).await;
            }
        }
        Err(SessionError::Unavailable {
            attempts: self.max_attempts,
            last,
        })
    }

    /// The valid bundle, if any. Never triggers a refresh.
    pub async fn current(&self) -> Option<SessionBundle> {
        let now = Utc::now();
        if let Some(bundle) = self.cached.read().await.as_ref() {
            if bundle.is_fresh(self.ttl, now) {
                return Some(bundle.clone());
            }
        }

        let stored = match self.read_blob().await {
            Ok(stored) => stored?,
            Err(e) => {
                warn!("Ignoring unreadable session blob {}: {}", self.blob_path.display(), e);
                return None;
            }
        };
        if !stored.is_fresh(self.ttl, now) {
            debug!("Stored session from {} is stale", stored.captured_at);
            return None;
        }
        *self.cached.write().await = Some(stored.clone());
        Some(stored)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(16));
        let jitter = rand::rng().random_range(0..=base);
        Duration::from_millis(exp + jitter)
    }

    async fn read_blob(&self) -> Result<Option<SessionBundle>, SessionError> {
        match tokio::fs::read_to_string(&self.blob_path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, bundle: &SessionBundle) -> Result<(), SessionError> {
        if let Some(parent) = self.blob_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.blob_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(bundle)?).await?;
        tokio::fs::rename(&tmp, &self.blob_path).await?;
        Ok(())
    }
}
