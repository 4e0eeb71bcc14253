//! A [`PriceOracle`] backed by the price service's JSON endpoints.
//!
//! - `GET {rates_url}` answers `{"usdPerBCH": 250.5, "usdPerToken": 0.08}`
//! - `GET {write_price_url}` answers `{"writePrice": 0.08335233}`
//!
//! Exchange rates are cached for a configurable TTL; the write price is
//! fetched on every call.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use pinclaim::oracle::{ExchangeRates, OracleError, PriceOracle};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::Instrument;
use url::Url;

use crate::error::HttpClientError;
use crate::read_body;

#[derive(Debug, Deserialize)]
struct RatesResponse {
    #[serde(rename = "usdPerBCH")]
    usd_per_bch: Decimal,
    #[serde(rename = "usdPerToken")]
    usd_per_token: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WritePriceResponse {
    write_price: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct CachedRates {
    rates: ExchangeRates,
    expires_at: Instant,
}

/// HTTP client for the price service.
#[derive(Debug)]
pub struct HttpPriceOracle {
    client: Client,
    rates_url: Url,
    write_price_url: Url,
    timeout: Option<Duration>,
    rates_ttl: Duration,
    cached: RwLock<Option<CachedRates>>,
}

impl HttpPriceOracle {
    /// Default TTL for cached exchange rates (1 minute).
    pub const DEFAULT_RATES_TTL: Duration = Duration::from_secs(60);

    /// Creates a client for the given endpoints.
    #[must_use]
    pub fn new(rates_url: Url, write_price_url: Url) -> Self {
        Self {
            client: Client::new(),
            rates_url,
            write_price_url,
            timeout: None,
            rates_ttl: Self::DEFAULT_RATES_TTL,
            cached: RwLock::new(None),
        }
    }

    /// Parses both endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError::UrlParse`] if either URL is malformed.
    pub fn try_new(rates_url: &str, write_price_url: &str) -> Result<Self, HttpClientError> {
        let rates_url = Url::parse(rates_url).map_err(|source| HttpClientError::UrlParse {
            context: "Failed to parse rates URL",
            source,
        })?;
        let write_price_url =
            Url::parse(write_price_url).map_err(|source| HttpClientError::UrlParse {
                context: "Failed to parse write price URL",
                source,
            })?;
        Ok(Self::new(rates_url, write_price_url))
    }

    /// Sets a timeout for every request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how long fetched exchange rates are reused.
    #[must_use]
    pub const fn with_rates_ttl(mut self, ttl: Duration) -> Self {
        self.rates_ttl = ttl;
        self
    }

    /// Fetches exchange rates on every call.
    #[must_use]
    pub const fn without_rates_cache(self) -> Self {
        self.with_rates_ttl(Duration::ZERO)
    }

    /// Fetches the exchange rates, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError`] on transport, status, or decoding failure,
    /// and [`HttpClientError::Malformed`] if a rate is not positive.
    pub async fn fetch_rates(&self) -> Result<ExchangeRates, HttpClientError> {
        const CONTEXT: &str = "GET rates";
        let body: RatesResponse = self.get_json(&self.rates_url, CONTEXT).await?;
        if body.usd_per_bch <= Decimal::ZERO || body.usd_per_token <= Decimal::ZERO {
            return Err(HttpClientError::Malformed {
                context: CONTEXT,
                reason: format!(
                    "non-positive rate: usdPerBCH={}, usdPerToken={}",
                    body.usd_per_bch, body.usd_per_token
                ),
            });
        }
        Ok(ExchangeRates {
            fiat_per_coin: body.usd_per_bch,
            fiat_per_token: body.usd_per_token,
        })
    }

    /// Fetches the storage token price per megabyte.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_rates`](Self::fetch_rates).
    pub async fn fetch_write_price(&self) -> Result<Decimal, HttpClientError> {
        const CONTEXT: &str = "GET write price";
        let body: WritePriceResponse = self.get_json(&self.write_price_url, CONTEXT).await?;
        if body.write_price <= Decimal::ZERO {
            return Err(HttpClientError::Malformed {
                context: CONTEXT,
                reason: format!("non-positive write price {}", body.write_price),
            });
        }
        Ok(body.write_price)
    }

    /// Drops any cached exchange rates.
    pub async fn clear_cache(&self) {
        *self.cached.write().await = None;
    }

    async fn cached_rates(&self) -> Option<ExchangeRates> {
        let guard = self.cached.read().await;
        let cached = guard.as_ref()?;
        (Instant::now() < cached.expires_at).then_some(cached.rates)
    }

    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, HttpClientError>
    where
        R: DeserializeOwned,
    {
        let mut req = self.client.get(url.clone());
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let response = req
            .send()
            .await
            .map_err(|source| HttpClientError::Http { context, source })?;
        let body = read_body(response, context).await?;
        serde_json::from_str(&body)
            .map_err(|source| HttpClientError::JsonDeserialization { context, source })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn storage_price_per_mb(&self) -> Result<Decimal, OracleError> {
        self.fetch_write_price()
            .instrument(tracing::info_span!("pinclaim.price_oracle.write_price", timeout = ?self.timeout))
            .await
            .map_err(OracleError::from)
    }

    async fn exchange_rates(&self) -> Result<ExchangeRates, OracleError> {
        if let Some(rates) = self.cached_rates().await {
            return Ok(rates);
        }
        let rates = self
            .fetch_rates()
            .instrument(tracing::info_span!("pinclaim.price_oracle.rates", timeout = ?self.timeout))
            .await
            .map_err(|err| {
                tracing::warn!(error = %err, "exchange rate request failed");
                OracleError::from(err)
            })?;
        *self.cached.write().await = Some(CachedRates {
            rates,
            expires_at: Instant::now() + self.rates_ttl,
        });
        Ok(rates)
    }
}
