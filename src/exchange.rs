use crate::config::ExchangeConfig;
use crate::model::ScraperError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Source of the source-to-target currency rate, read once per crawl run.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn current_rate(&self) -> Result<f64, ScraperError>;
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, f64>,
}

pub struct HttpRateSource {
    client: Client,
    url: String,
    target: String,
}

impl HttpRateSource {
    pub fn new(client: Client, config: &ExchangeConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            target: config.target_currency.clone(),
        }
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn current_rate(&self) -> Result<f64, ScraperError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ScraperError::RemoteUnavailable(format!(
                "exchange rate status {}",
                response.status()
            )));
        }
        let payload: RatesResponse = response
            .json()
            .await
            .map_err(|e| ScraperError::InvalidResponse(e.to_string()))?;
        let rate = payload
            .rates
            .get(&self.target)
            .copied()
            .filter(|r| r.is_finite() && *r > 0.0)
            .ok_or_else(|| ScraperError::InvalidResponse(format!("no {} rate", self.target)))?;
        info!("💱 Exchange rate -> {}: {}", self.target, rate);
        Ok(rate)
    }
}

/// A fixed rate; handy when conversion is not needed.
pub struct FixedRate(pub f64);

#[async_trait]
impl RateSource for FixedRate {
    async fn current_rate(&self) -> Result<f64, ScraperError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(url: String) -> HttpRateSource {
        HttpRateSource::new(
            Client::new(),
            &ExchangeConfig {
                url,
                target_currency: "RUB".into(),
            },
        )
    }

    #[tokio::test]
    async fn reads_target_rate() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v4/latest/KRW")
            .with_status(200)
            .with_body(r#"{"base":"KRW","rates":{"KRW":1,"RUB":0.0589,"USD":0.00072}}"#)
            .create_async()
            .await;
        let rate = source(format!("{}/v4/latest/KRW", server.url()))
            .current_rate()
            .await
            .unwrap();
        assert!((rate - 0.0589).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn missing_currency_or_bad_status_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/no-rub")
            .with_status(200)
            .with_body(r#"{"rates":{"USD":0.00072}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/down")
            .with_status(502)
            .create_async()
            .await;

        let err = source(format!("{}/no-rub", server.url())).current_rate().await.unwrap_err();
        assert!(matches!(err, ScraperError::InvalidResponse(_)));
        let err = source(format!("{}/down", server.url())).current_rate().await.unwrap_err();
        assert!(matches!(err, ScraperError::RemoteUnavailable(_)));
    }
}
