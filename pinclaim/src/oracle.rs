//! Price oracle boundary.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fiat exchange rates for the payment coin and the storage token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRates {
    /// Fiat value of one coin.
    pub fiat_per_coin: Decimal,
    /// Fiat value of one storage token.
    pub fiat_per_token: Decimal,
}

/// Errors reported by a [`PriceOracle`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    /// The price service could not be reached or answered with an error.
    #[error("price service unavailable: {0}")]
    Unavailable(String),
    /// The price service answered with something that is not a price.
    #[error("malformed price data: {0}")]
    Malformed(String),
}

/// Source of the storage price and exchange rates used for quotes.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Storage tokens charged per megabyte written.
    async fn storage_price_per_mb(&self) -> Result<Decimal, OracleError>;

    /// Current fiat exchange rates.
    async fn exchange_rates(&self) -> Result<ExchangeRates, OracleError>;
}
