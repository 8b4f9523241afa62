use serde::Deserialize;
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A remote catalog segment crawled independently.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CategoryConfig {
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Plain requests without session material.
    Direct,
    /// Requests carry the anti-bot session bundle.
    #[default]
    Session,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_listing_url_base")]
    pub listing_url_base: String,
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub transport: TransportKind,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            listing_url_base: default_listing_url_base(),
            categories: default_categories(),
            page_size: default_page_size(),
            max_pages: None,
            page_delay_ms: default_page_delay_ms(),
            max_concurrent: default_max_concurrent(),
            request_timeout_seconds: default_request_timeout(),
            user_agent: default_user_agent(),
            transport: TransportKind::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionProviderKind {
    #[default]
    Http,
    Browser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_warmup_url")]
    pub warmup_url: String,
    #[serde(default = "default_dwell")]
    pub dwell_seconds: u64,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_blob_path")]
    pub blob_path: String,
    #[serde(default)]
    pub provider: SessionProviderKind,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            warmup_url: default_warmup_url(),
            dwell_seconds: default_dwell(),
            ttl_seconds: default_ttl(),
            blob_path: default_blob_path(),
            provider: SessionProviderKind::default(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_exchange_url")]
    pub url: String,
    #[serde(default = "default_target_currency")]
    pub target_currency: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            url: default_exchange_url(),
            target_currency: default_target_currency(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TranslatorKind {
    #[default]
    Llm,
    /// No provider: labels are only capitalized.
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslationConfig {
    #[serde(default)]
    pub provider: TranslatorKind,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_source_language")]
    pub source_language: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslatorKind::default(),
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            source_language: default_source_language(),
            target_language: default_target_language(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    pub telegram_bot_token: String,
    #[serde(default = "default_crawl_interval")]
    pub crawl_interval_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_seconds: u64,
    #[serde(default = "default_session_refresh_interval")]
    pub session_refresh_interval_seconds: u64,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scraper.page_size == 0 {
            return Err(ConfigError::Invalid("scraper.page_size must be positive".into()));
        }
        if !(1..=20).contains(&self.scraper.max_concurrent) {
            return Err(ConfigError::Invalid(format!(
                "scraper.max_concurrent must be within 1..=20, got {}",
                self.scraper.max_concurrent
            )));
        }
        if self.scraper.categories.is_empty() {
            return Err(ConfigError::Invalid("scraper.categories is empty".into()));
        }
        if self.session.max_attempts == 0 {
            return Err(ConfigError::Invalid("session.max_attempts must be positive".into()));
        }
        Ok(())
    }
}

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}

fn default_database_path() -> String {
    "data.db".into()
}
fn default_crawl_interval() -> u64 {
    48 * 3600
}
fn default_sweep_interval() -> u64 {
    24 * 3600
}
fn default_reminder_interval() -> u64 {
    24 * 3600
}
fn default_session_refresh_interval() -> u64 {
    5 * 3600
}
fn default_api_base() -> String {
    "https://api.encar.com".into()
}
fn default_listing_url_base() -> String {
    "https://fem.encar.com/cars/detail".into()
}
fn default_categories() -> Vec<CategoryConfig> {
    vec![
        CategoryConfig {
            name: "kor".into(),
            query: "(And.Hidden.N._.CarType.A.)".into(),
        },
        CategoryConfig {
            name: "ev".into(),
            query: "(And.Hidden.N._.CarType.A._.GreenType.Y.)".into(),
        },
    ]
}
fn default_page_size() -> u32 {
    200
}
fn default_page_delay_ms() -> u64 {
    1000
}
fn default_max_concurrent() -> usize {
    5
}
fn default_request_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:138.0) Gecko/20100101 Firefox/138.0".into()
}
fn default_warmup_url() -> String {
    "https://car.encar.com/list/car?page=1".into()
}
fn default_dwell() -> u64 {
    30
}
fn default_ttl() -> u64 {
    6 * 3600
}
fn default_blob_path() -> String {
    "session/session.json".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2000
}
fn default_exchange_url() -> String {
    "https://api.exchangerate-api.com/v4/latest/KRW".into()
}
fn default_target_currency() -> String {
    "RUB".into()
}
fn default_llm_endpoint() -> String {
    "https://api.deepseek.com".into()
}
fn default_llm_model() -> String {
    "deepseek-chat".into()
}
fn default_source_language() -> String {
    "Korean".into()
}
fn default_target_language() -> String {
    "English".into()
}
