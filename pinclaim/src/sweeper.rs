//! Moves collected payments to the operator wallet.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::boundary::bounded;
use crate::error::{PinClaimError, TxStage};
use crate::ledger::PaymentRecord;
use crate::wallet::{Wallet, WalletError};

/// Sweeps a funded payment address into the operator's main wallet.
///
/// The sweep spends every coin and storage-token output at the address.
/// Callers serialize sweeps per address; the sweeper itself only refuses
/// records that have left [`Pending`](crate::ledger::PaymentState::Pending).
pub struct FundSweeper {
    wallet: Arc<dyn Wallet>,
    operator_address: String,
    timeout: Duration,
}

impl std::fmt::Debug for FundSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundSweeper")
            .field("operator_address", &self.operator_address)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FundSweeper {
    /// Creates a sweeper paying into `operator_address`.
    #[must_use]
    pub fn new(wallet: Arc<dyn Wallet>, operator_address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            wallet,
            operator_address: operator_address.into(),
            timeout,
        }
    }

    /// Destination of every sweep.
    #[must_use]
    pub fn operator_address(&self) -> &str {
        &self.operator_address
    }

    /// Builds, signs, and broadcasts the sweep for `record`, returning its txid.
    ///
    /// # Errors
    ///
    /// - [`PinClaimError::AlreadyClaimed`], [`PinClaimError::OrphanedBurn`] or
    ///   [`PinClaimError::BurnUnconfirmed`] if the record is no longer pending
    /// - [`PinClaimError::InsufficientFunds`] if nothing is left to spend
    /// - [`PinClaimError::BroadcastFailed`] if the network refused the
    ///   transaction; funds stay at the address
    /// - [`PinClaimError::BalanceQuery`], [`PinClaimError::Wallet`] or
    ///   [`PinClaimError::Timeout`] on collaborator failure
    pub async fn sweep(&self, record: &PaymentRecord) -> Result<String, PinClaimError> {
        let address = record.address.as_str();
        record.check_pending()?;

        let balance = bounded(self.timeout, "balance", address, self.wallet.balance(address))
            .await?
            .map_err(|source| PinClaimError::BalanceQuery {
                address: address.to_owned(),
                source,
            })?;
        if balance <= Decimal::ZERO {
            tracing::warn!(address, "payment address emptied before sweep");
            return Err(insufficient(address));
        }

        let tx = bounded(
            self.timeout,
            "build sweep",
            address,
            self.wallet.build_sweep(&record.private_key, &self.operator_address),
        )
        .await?
        .map_err(|source| match source {
            WalletError::NoSpendableFunds(_) => insufficient(address),
            source => PinClaimError::Wallet {
                operation: "build sweep",
                source,
            },
        })?;

        let sweep_txid = bounded(self.timeout, "broadcast sweep", address, self.wallet.broadcast(&tx))
            .await?
            .map_err(|source| match source {
                WalletError::NoSpendableFunds(_) => insufficient(address),
                source => PinClaimError::BroadcastFailed {
                    address: address.to_owned(),
                    stage: TxStage::Sweep,
                    source,
                },
            })?;

        tracing::info!(
            address,
            %balance,
            destination = %self.operator_address,
            sweep_txid = %sweep_txid,
            "swept payment address"
        );
        Ok(sweep_txid)
    }
}

fn insufficient(address: &str) -> PinClaimError {
    PinClaimError::InsufficientFunds {
        address: address.to_owned(),
    }
}
