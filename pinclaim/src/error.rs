//! Error types for the pin-claim lifecycle.
//!
//! Every failure surfaced by [`PinClaimService`](crate::service::PinClaimService)
//! is a [`PinClaimError`]. Each variant carries the address or content id
//! needed to correlate it with ledger state, and [`PinClaimError::kind`]
//! classifies it for callers that decide between retrying, reporting a
//! conflict, or paging an operator.

use std::fmt;

use rust_decimal::Decimal;

use crate::ledger::LedgerError;
use crate::store::StoreError;
use crate::wallet::WalletError;

/// Coarse classification of a [`PinClaimError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad size, address, content id, filename, or payload. Not retried.
    InvalidInput,
    /// Price oracle, wallet, ledger backend, or content store failed or timed out.
    /// Transient; callers may retry with backoff.
    CollaboratorUnavailable,
    /// A payment rule was violated (underfunded, funds gone, payments off).
    BusinessRule,
    /// The request conflicts with ledger state.
    Conflict,
    /// Collateral was, or may have been, burned without a recorded claim.
    /// Needs an operator.
    OrphanedBurn,
}

/// Transaction kinds broadcast on behalf of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxStage {
    /// Moves the payment address balance to the operator wallet.
    Sweep,
    /// Burns storage tokens as collateral.
    ProofOfBurn,
    /// Announces the pin claim to storage providers.
    Claim,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sweep => "sweep",
            Self::ProofOfBurn => "proof-of-burn",
            Self::Claim => "claim",
        };
        f.write_str(name)
    }
}

/// Errors produced by the pin-claim lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum PinClaimError {
    /// Requested size is zero or negative.
    #[error("invalid size: {size_mb} MB (must be greater than zero)")]
    InvalidSize {
        /// The rejected size.
        size_mb: Decimal,
    },
    /// Payment address is empty or malformed.
    #[error("invalid payment address: {address:?}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
    },
    /// Content identifier is empty or malformed.
    #[error("invalid content id: {cid:?}")]
    InvalidContentId {
        /// The rejected content id.
        cid: String,
    },
    /// Filename is empty or contains a path separator.
    #[error("invalid filename: {filename:?}")]
    InvalidFilename {
        /// The rejected filename.
        filename: String,
    },
    /// Upload exceeds the configured maximum size.
    #[error("payload of {size} bytes exceeds max file size of {max} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload in bytes.
        size: u64,
        /// Configured maximum in bytes.
        max: u64,
    },
    /// No object with this content id is held by the content store.
    #[error("content {cid} not found")]
    ObjectNotFound {
        /// The missing content id.
        cid: String,
    },

    /// Exchange rate or storage price could not be obtained or was unusable.
    #[error("rate unavailable: {reason}")]
    RateUnavailable {
        /// Why the rates could not be used.
        reason: String,
    },
    /// On-chain balance lookup failed.
    #[error("balance query failed for {address}: {source}")]
    BalanceQuery {
        /// Address whose balance was requested.
        address: String,
        /// Underlying wallet error.
        #[source]
        source: WalletError,
    },
    /// The network rejected or could not relay a transaction.
    ///
    /// Funds remain at the payment address when `stage` is [`TxStage::Sweep`].
    #[error("{stage} broadcast failed for {address}: {source}")]
    BroadcastFailed {
        /// Payment address the transaction was built for.
        address: String,
        /// Which transaction failed.
        stage: TxStage,
        /// Underlying wallet error.
        #[source]
        source: WalletError,
    },
    /// Wallet operation other than a balance query or broadcast failed.
    #[error("wallet error during {operation}: {source}")]
    Wallet {
        /// What the wallet was asked to do.
        operation: &'static str,
        /// Underlying wallet error.
        #[source]
        source: WalletError,
    },
    /// Content store operation failed.
    #[error("content store error during {operation} of {cid}: {source}")]
    Storage {
        /// What the store was asked to do.
        operation: &'static str,
        /// Content id involved, or the filename for uploads.
        cid: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// Ledger backend failed.
    #[error("ledger error for {address}: {source}")]
    Ledger {
        /// Address of the record being read or written.
        address: String,
        /// Underlying ledger error.
        #[source]
        source: LedgerError,
    },
    /// A collaborator call exceeded its bounded timeout.
    ///
    /// The remote side may still have completed the operation.
    #[error("{operation} timed out for {target}")]
    Timeout {
        /// Collaborator operation that timed out.
        operation: &'static str,
        /// Address or content id involved.
        target: String,
    },
    /// The caller-supplied deadline expired before the operation finished.
    #[error("deadline exceeded during {operation}")]
    DeadlineExceeded {
        /// Client-facing operation that was cut short.
        operation: &'static str,
    },

    /// On-chain balance is below the quoted cost.
    #[error("address {address} is underfunded: balance {balance}, quoted {quoted}")]
    Underfunded {
        /// Payment address.
        address: String,
        /// Observed balance.
        balance: Decimal,
        /// Quoted cost.
        quoted: Decimal,
    },
    /// Nothing is left to sweep: the funds were moved by an earlier sweep
    /// whose reply was lost, or disappeared before this one.
    #[error("no spendable funds at {address}")]
    InsufficientFunds {
        /// Payment address.
        address: String,
    },
    /// Payments are switched off in this deployment.
    #[error("payments are not enabled on this instance")]
    PaymentsDisabled,

    /// The payment record has already been claimed.
    #[error("payment address {address} has already been claimed")]
    AlreadyClaimed {
        /// Payment address.
        address: String,
    },
    /// No payment record exists for the address.
    #[error("no payment record for address {address}")]
    RecordNotFound {
        /// Payment address.
        address: String,
    },
    /// A record with this address or HD index already exists.
    #[error("duplicate payment record for address {address}")]
    DuplicateRecord {
        /// Payment address.
        address: String,
    },
    /// The index sequence went backwards or ran out of indexes.
    #[error("HD index regression: issued {issued} after {previous}")]
    IndexRegression {
        /// Index returned by the sequence.
        issued: u64,
        /// Highest index handed out before.
        previous: u64,
    },
    /// Operator recovery was requested for a record without an orphaned or
    /// unconfirmed burn.
    #[error("payment address {address} has no orphaned proof-of-burn")]
    NotOrphaned {
        /// Payment address.
        address: String,
    },

    /// The proof-of-burn was broadcast but the claim was not recorded.
    ///
    /// Retrying the claim from scratch would burn collateral twice.
    #[error(
        "orphaned proof-of-burn {proof_of_burn_txid} for {address}: {cause}; manual reconciliation required"
    )]
    OrphanedBurn {
        /// Payment address.
        address: String,
        /// Content id the claim was for, when known.
        content_id: Option<String>,
        /// Transaction id of the broadcast proof-of-burn.
        proof_of_burn_txid: String,
        /// Why the claim phase failed.
        cause: String,
    },

    /// A proof-of-burn broadcast gave no answer, so the collateral may or may
    /// not be burned.
    ///
    /// The record stays `BurnUnconfirmed` until an operator checks the chain.
    #[error(
        "proof-of-burn for {address} has no known outcome: {cause}; manual reconciliation required"
    )]
    BurnUnconfirmed {
        /// Payment address.
        address: String,
        /// Content id the claim was for, when known.
        content_id: Option<String>,
        /// Why the outcome is unknown.
        cause: String,
    },
}

impl PinClaimError {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSize { .. }
            | Self::InvalidAddress { .. }
            | Self::InvalidContentId { .. }
            | Self::InvalidFilename { .. }
            | Self::PayloadTooLarge { .. }
            | Self::ObjectNotFound { .. } => ErrorKind::InvalidInput,
            Self::RateUnavailable { .. }
            | Self::BalanceQuery { .. }
            | Self::BroadcastFailed { .. }
            | Self::Wallet { .. }
            | Self::Storage { .. }
            | Self::Ledger { .. }
            | Self::Timeout { .. }
            | Self::DeadlineExceeded { .. } => ErrorKind::CollaboratorUnavailable,
            Self::Underfunded { .. } | Self::InsufficientFunds { .. } | Self::PaymentsDisabled => {
                ErrorKind::BusinessRule
            }
            Self::AlreadyClaimed { .. }
            | Self::RecordNotFound { .. }
            | Self::DuplicateRecord { .. }
            | Self::IndexRegression { .. }
            | Self::NotOrphaned { .. } => ErrorKind::Conflict,
            Self::OrphanedBurn { .. } | Self::BurnUnconfirmed { .. } => ErrorKind::OrphanedBurn,
        }
    }

    /// Returns `true` if the caller may retry the same request with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::CollaboratorUnavailable)
    }

    pub(crate) fn rate(reason: impl Into<String>) -> Self {
        Self::RateUnavailable {
            reason: reason.into(),
        }
    }
}

impl From<LedgerError> for PinClaimError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound { address } => Self::RecordNotFound { address },
            LedgerError::AlreadyClaimed { address } => Self::AlreadyClaimed { address },
            LedgerError::BurnOrphaned {
                address,
                proof_of_burn_txid,
            } => Self::OrphanedBurn {
                address,
                content_id: None,
                proof_of_burn_txid,
                cause: "an earlier claim attempt failed after burning".to_owned(),
            },
            LedgerError::BurnUnconfirmed { address } => Self::BurnUnconfirmed {
                address,
                content_id: None,
                cause: "an earlier proof-of-burn broadcast never answered".to_owned(),
            },
            LedgerError::NotOrphaned { address } => Self::NotOrphaned { address },
            LedgerError::SweepAlreadyRecorded { address, .. } => {
                Self::InsufficientFunds { address }
            }
            LedgerError::DuplicateAddress { address }
            | LedgerError::DuplicateIndex { address, .. } => Self::DuplicateRecord { address },
            LedgerError::Backend { ref address, .. } => Self::Ledger {
                address: address.clone(),
                source: value,
            },
        }
    }
}
