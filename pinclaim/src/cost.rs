//! Storage cost quotes.
//!
//! A quote converts a size in megabytes into storage tokens at the current
//! write price, then into coins at the current exchange rate, applies the
//! operator markup, and adds a fixed network-fee allowance. Every step is
//! truncated to eight fractional digits (see [`amount::truncate`]).

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::amount;
use crate::boundary::bounded;
use crate::error::PinClaimError;
use crate::oracle::{ExchangeRates, PriceOracle};

/// Operator pricing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostPolicy {
    /// Fractional markup on the coin cost (`0.1` is 10%).
    pub markup: Decimal,
    /// Coins added to every quote to cover the sweep and claim fees.
    pub network_fee: Decimal,
    /// Smallest size billed; smaller requests are charged at this size.
    /// Zero disables the floor.
    pub minimum_billable_mb: Decimal,
}

/// Intermediate values of a quote, kept for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    /// Size requested by the client.
    pub size_mb: Decimal,
    /// Size actually billed.
    pub billable_mb: Decimal,
    /// Storage tokens needed for `billable_mb`.
    pub token_cost: Decimal,
    /// Coins per storage token at the quoted rates.
    pub coin_per_token: Decimal,
    /// Final coin cost including markup and network fee.
    pub coin_cost: Decimal,
}

impl CostPolicy {
    /// Prices `size_mb` at the given storage price and exchange rates.
    ///
    /// # Errors
    ///
    /// Returns [`PinClaimError::InvalidSize`] if `size_mb` is not positive,
    /// and [`PinClaimError::RateUnavailable`] if a rate is not positive, the
    /// arithmetic overflows, or the result is not positive.
    pub fn price(
        &self,
        size_mb: Decimal,
        price_per_mb: Decimal,
        rates: ExchangeRates,
    ) -> Result<CostBreakdown, PinClaimError> {
        let token_cost = self.token_cost(size_mb, price_per_mb)?;
        let fiat_per_coin = amount::positive(rates.fiat_per_coin)
            .ok_or_else(|| PinClaimError::rate(format!("fiat per coin is {}", rates.fiat_per_coin)))?;
        let fiat_per_token = amount::positive(rates.fiat_per_token).ok_or_else(|| {
            PinClaimError::rate(format!("fiat per token is {}", rates.fiat_per_token))
        })?;

        let overflow = || PinClaimError::rate("quote arithmetic overflowed");
        let coin_per_token = amount::div(fiat_per_token, fiat_per_coin).ok_or_else(overflow)?;
        let base = amount::mul(token_cost, coin_per_token).ok_or_else(overflow)?;
        let factor = Decimal::ONE.checked_add(self.markup).ok_or_else(overflow)?;
        let marked_up = amount::mul(base, factor).ok_or_else(overflow)?;
        let coin_cost = marked_up
            .checked_add(self.network_fee)
            .map(amount::truncate)
            .ok_or_else(overflow)?;
        let coin_cost = amount::positive(coin_cost)
            .ok_or_else(|| PinClaimError::rate("rates too small to price this size"))?;

        Ok(CostBreakdown {
            size_mb,
            billable_mb: self.billable(size_mb),
            token_cost,
            coin_per_token,
            coin_cost,
        })
    }

    /// Storage tokens needed for `size_mb` at `price_per_mb`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`price`](Self::price) for the size and the token price.
    pub fn token_cost(&self, size_mb: Decimal, price_per_mb: Decimal) -> Result<Decimal, PinClaimError> {
        if size_mb <= Decimal::ZERO {
            return Err(PinClaimError::InvalidSize { size_mb });
        }
        let price_per_mb = amount::positive(price_per_mb)
            .ok_or_else(|| PinClaimError::rate(format!("storage price is {price_per_mb}")))?;
        amount::mul(self.billable(size_mb), price_per_mb)
            .ok_or_else(|| PinClaimError::rate("token cost overflowed"))
    }

    fn billable(&self, size_mb: Decimal) -> Decimal {
        size_mb.max(self.minimum_billable_mb)
    }
}

/// Quotes storage cost using live prices.
pub struct CostCalculator {
    oracle: Arc<dyn PriceOracle>,
    policy: CostPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for CostCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostCalculator")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CostCalculator {
    /// Creates a calculator over `oracle`.
    #[must_use]
    pub fn new(oracle: Arc<dyn PriceOracle>, policy: CostPolicy, timeout: Duration) -> Self {
        Self {
            oracle,
            policy,
            timeout,
        }
    }

    /// Returns the pricing policy.
    #[must_use]
    pub const fn policy(&self) -> &CostPolicy {
        &self.policy
    }

    /// Coin cost of storing `size_mb` megabytes.
    ///
    /// # Errors
    ///
    /// See [`breakdown`](Self::breakdown).
    pub async fn quote(&self, size_mb: Decimal) -> Result<Decimal, PinClaimError> {
        Ok(self.breakdown(size_mb).await?.coin_cost)
    }

    /// Full quote with intermediate values.
    ///
    /// # Errors
    ///
    /// Returns [`PinClaimError::InvalidSize`] for a non-positive size and
    /// [`PinClaimError::RateUnavailable`] if the oracle fails, times out, or
    /// returns unusable values.
    pub async fn breakdown(&self, size_mb: Decimal) -> Result<CostBreakdown, PinClaimError> {
        if size_mb <= Decimal::ZERO {
            return Err(PinClaimError::InvalidSize { size_mb });
        }
        let (price_per_mb, rates) =
            tokio::try_join!(self.storage_price_per_mb(), self.exchange_rates())?;
        let breakdown = self.policy.price(size_mb, price_per_mb, rates)?;
        tracing::debug!(
            size_mb = %breakdown.size_mb,
            billable_mb = %breakdown.billable_mb,
            token_cost = %breakdown.token_cost,
            coin_per_token = %breakdown.coin_per_token,
            coin_cost = %breakdown.coin_cost,
            "computed storage quote"
        );
        Ok(breakdown)
    }

    /// Storage tokens to burn as collateral for `size_mb`.
    ///
    /// # Errors
    ///
    /// Same as [`breakdown`](Self::breakdown), without the exchange-rate lookup.
    pub async fn token_cost(&self, size_mb: Decimal) -> Result<Decimal, PinClaimError> {
        if size_mb <= Decimal::ZERO {
            return Err(PinClaimError::InvalidSize { size_mb });
        }
        let price_per_mb = self.storage_price_per_mb().await?;
        self.policy.token_cost(size_mb, price_per_mb)
    }

    async fn storage_price_per_mb(&self) -> Result<Decimal, PinClaimError> {
        bounded(
            self.timeout,
            "storage price",
            "price oracle",
            self.oracle.storage_price_per_mb(),
        )
        .await
        .map_err(|e| PinClaimError::rate(e.to_string()))?
        .map_err(|e| PinClaimError::rate(e.to_string()))
    }

    async fn exchange_rates(&self) -> Result<ExchangeRates, PinClaimError> {
        bounded(
            self.timeout,
            "exchange rates",
            "price oracle",
            self.oracle.exchange_rates(),
        )
        .await
        .map_err(|e| PinClaimError::rate(e.to_string()))?
        .map_err(|e| PinClaimError::rate(e.to_string()))
    }
}
