//! On-chain funding checks.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::boundary::bounded;
use crate::error::PinClaimError;
use crate::ledger::PaymentRecord;
use crate::wallet::Wallet;

/// Outcome of comparing a payment address balance to its quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingStatus {
    /// Balance covers the quoted cost.
    Funded {
        /// Observed balance.
        balance: Decimal,
    },
    /// Balance is below the quoted cost.
    Underfunded {
        /// Observed balance.
        balance: Decimal,
        /// Amount still missing.
        shortfall: Decimal,
    },
}

impl FundingStatus {
    /// Returns `true` for [`FundingStatus::Funded`].
    #[must_use]
    pub const fn is_funded(&self) -> bool {
        matches!(self, Self::Funded { .. })
    }

    /// Balance observed during verification.
    #[must_use]
    pub const fn balance(&self) -> Decimal {
        match self {
            Self::Funded { balance } | Self::Underfunded { balance, .. } => *balance,
        }
    }
}

/// Checks payment addresses against their quoted cost.
///
/// Performs a single balance lookup per call; retrying is left to the caller.
pub struct PaymentVerifier {
    wallet: Arc<dyn Wallet>,
    timeout: Duration,
}

impl std::fmt::Debug for PaymentVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentVerifier")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PaymentVerifier {
    /// Creates a verifier over `wallet`.
    #[must_use]
    pub fn new(wallet: Arc<dyn Wallet>, timeout: Duration) -> Self {
        Self { wallet, timeout }
    }

    /// Compares the balance of `record.address` with `record.quoted_cost`.
    ///
    /// # Errors
    ///
    /// Returns [`PinClaimError::BalanceQuery`] if the wallet fails and
    /// [`PinClaimError::Timeout`] if it does not answer in time.
    pub async fn verify(&self, record: &PaymentRecord) -> Result<FundingStatus, PinClaimError> {
        let balance = bounded(
            self.timeout,
            "balance",
            &record.address,
            self.wallet.balance(&record.address),
        )
        .await?
        .map_err(|source| PinClaimError::BalanceQuery {
            address: record.address.clone(),
            source,
        })?;

        let status = if balance >= record.quoted_cost {
            FundingStatus::Funded { balance }
        } else {
            FundingStatus::Underfunded {
                balance,
                shortfall: record.quoted_cost - balance,
            }
        };
        tracing::debug!(
            address = %record.address,
            %balance,
            quoted = %record.quoted_cost,
            funded = status.is_funded(),
            "verified payment address balance"
        );
        Ok(status)
    }
}
