//! Payment records and the ledger that persists them.
//!
//! A [`PaymentRecord`] is created for every allocated payment address and is
//! never deleted. Its [`PaymentState`] moves forward only, except for the
//! explicit reset of a burn attempt that is known not to have reached the
//! chain:
//!
//! ```text
//!          mark_burn_attempted                mark_claimed
//! Pending ─────────────────────▶ BurnUnconfirmed ─────────────────▶ Claimed
//!    ▲                                │                               ▲
//!    └──────reset_burn_attempt────────┤ mark_burn_orphaned            │
//!                                     ▼                               │
//!                               BurnOrphaned ──complete_orphaned──────┘
//! ```
//!
//! Every transition is a compare-and-swap on the current state, so two
//! concurrent claim attempts for one address cannot both finalize it.
//! `mark_claimed` and `mark_burn_orphaned` also accept `Pending` for ledgers
//! driven without burn bookkeeping.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::timestamp::UnixTimestamp;
use crate::wallet::PrivateKeyMaterial;

/// Lifecycle state of a payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PaymentState {
    /// Quoted and waiting for funding or claim.
    Pending,
    /// A proof-of-burn broadcast started and its outcome is not known.
    ///
    /// Only the running claim or operator reconciliation moves it on.
    BurnUnconfirmed,
    /// Collateral burned but the claim transaction was never recorded.
    #[serde(rename_all = "camelCase")]
    BurnOrphaned {
        /// Transaction id of the broadcast proof-of-burn.
        proof_of_burn_txid: String,
    },
    /// Pin claim recorded on chain. Terminal.
    #[serde(rename_all = "camelCase")]
    Claimed {
        /// Transaction id of the proof-of-burn.
        proof_of_burn_txid: String,
        /// Transaction id of the claim.
        claim_txid: String,
    },
}

/// One allocated payment address and everything needed to settle it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    /// Payment address; unique key of the ledger.
    pub address: String,
    /// Key for sweeping the address.
    pub private_key: PrivateKeyMaterial,
    /// Coin amount quoted to the client.
    pub quoted_cost: Decimal,
    /// Size the quote was made for, in megabytes.
    pub requested_size_mb: Decimal,
    /// Derivation index of `address`.
    pub hd_index: u64,
    /// When the quote was issued.
    pub created_at: UnixTimestamp,
    /// Sweep transaction id, once the sweep broadcast was acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_txid: Option<String>,
    /// Set before the sweep is broadcast; stays set if the broadcast outcome
    /// was never learned.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sweep_attempted: bool,
    /// Current lifecycle state.
    pub state: PaymentState,
}

impl PaymentRecord {
    /// Creates a [`PaymentState::Pending`] record.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        private_key: PrivateKeyMaterial,
        quoted_cost: Decimal,
        requested_size_mb: Decimal,
        hd_index: u64,
        created_at: UnixTimestamp,
    ) -> Self {
        Self {
            address: address.into(),
            private_key,
            quoted_cost,
            requested_size_mb,
            hd_index,
            created_at,
            sweep_txid: None,
            sweep_attempted: false,
            state: PaymentState::Pending,
        }
    }

    /// Returns `true` while the record can still be swept and claimed.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.state, PaymentState::Pending)
    }

    /// Fails with the conflict matching the current state unless `Pending`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AlreadyClaimed`], [`LedgerError::BurnOrphaned`] or
    /// [`LedgerError::BurnUnconfirmed`].
    pub fn check_pending(&self) -> Result<(), LedgerError> {
        match &self.state {
            PaymentState::Pending => Ok(()),
            _ => Err(state_conflict(self)),
        }
    }

    /// Returns `true` once the claim has been recorded.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self.state, PaymentState::Claimed { .. })
    }

    /// Proof-of-burn transaction id, if one was recorded.
    #[must_use]
    pub fn proof_of_burn_txid(&self) -> Option<&str> {
        match &self.state {
            PaymentState::Pending | PaymentState::BurnUnconfirmed => None,
            PaymentState::BurnOrphaned { proof_of_burn_txid }
            | PaymentState::Claimed {
                proof_of_burn_txid, ..
            } => Some(proof_of_burn_txid),
        }
    }

    /// Claim transaction id, if the record is claimed.
    #[must_use]
    pub fn claim_txid(&self) -> Option<&str> {
        match &self.state {
            PaymentState::Claimed { claim_txid, .. } => Some(claim_txid),
            _ => None,
        }
    }
}

/// Errors reported by a [`PaymentLedger`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// No record for the address.
    #[error("no payment record for {address}")]
    NotFound {
        /// Requested address.
        address: String,
    },
    /// The record is already claimed.
    #[error("payment record {address} is already claimed")]
    AlreadyClaimed {
        /// Record address.
        address: String,
    },
    /// The record holds an orphaned proof-of-burn.
    #[error("payment record {address} has orphaned burn {proof_of_burn_txid}")]
    BurnOrphaned {
        /// Record address.
        address: String,
        /// Recorded burn transaction id.
        proof_of_burn_txid: String,
    },
    /// A proof-of-burn broadcast for the record has no known outcome.
    #[error("payment record {address} has an unconfirmed proof-of-burn")]
    BurnUnconfirmed {
        /// Record address.
        address: String,
    },
    /// Recovery was requested for a record with no orphaned or unconfirmed burn.
    #[error("payment record {address} is not orphaned")]
    NotOrphaned {
        /// Record address.
        address: String,
    },
    /// A different sweep transaction was already recorded.
    #[error("payment record {address} already swept by {sweep_txid}")]
    SweepAlreadyRecorded {
        /// Record address.
        address: String,
        /// Previously recorded sweep transaction id.
        sweep_txid: String,
    },
    /// A record with this address exists.
    #[error("payment record {address} already exists")]
    DuplicateAddress {
        /// Record address.
        address: String,
    },
    /// A record with this HD index exists.
    #[error("HD index {hd_index} is already assigned (new record {address})")]
    DuplicateIndex {
        /// Address of the rejected record.
        address: String,
        /// Reused index.
        hd_index: u64,
    },
    /// The storage backend failed.
    #[error("ledger backend failure: {reason}")]
    Backend {
        /// Address being read or written.
        address: String,
        /// Backend error text.
        reason: String,
    },
}

/// Durable store of [`PaymentRecord`]s keyed by address.
///
/// Implementations must make each state-changing method a single atomic
/// compare-and-swap against the current [`PaymentState`].
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Inserts a new record. Fails if the address or HD index is taken.
    async fn create(&self, record: PaymentRecord) -> Result<(), LedgerError>;

    /// Looks up a record by address.
    async fn find_by_address(&self, address: &str) -> Result<PaymentRecord, LedgerError>;

    /// Flags a `Pending` record as about to broadcast its sweep. Idempotent.
    async fn mark_sweep_attempted(&self, address: &str) -> Result<(), LedgerError>;

    /// Stores the sweep transaction id of a `Pending` record.
    ///
    /// Recording the same id twice is a no-op.
    async fn record_sweep(&self, address: &str, sweep_txid: &str) -> Result<(), LedgerError>;

    /// Moves a `Pending` record to `BurnUnconfirmed`.
    async fn mark_burn_attempted(&self, address: &str) -> Result<(), LedgerError>;

    /// Moves a `BurnUnconfirmed` record back to `Pending`.
    ///
    /// Only valid once the burn is known not to be on chain.
    async fn reset_burn_attempt(&self, address: &str) -> Result<(), LedgerError>;

    /// Moves a `Pending` or `BurnUnconfirmed` record to `Claimed`.
    async fn mark_claimed(
        &self,
        address: &str,
        proof_of_burn_txid: &str,
        claim_txid: &str,
    ) -> Result<PaymentRecord, LedgerError>;

    /// Moves a `Pending` or `BurnUnconfirmed` record to `BurnOrphaned`.
    async fn mark_burn_orphaned(
        &self,
        address: &str,
        proof_of_burn_txid: &str,
    ) -> Result<(), LedgerError>;

    /// Moves a `BurnOrphaned` record to `Claimed`, keeping its burn id.
    async fn complete_orphaned(
        &self,
        address: &str,
        claim_txid: &str,
    ) -> Result<PaymentRecord, LedgerError>;

    /// Highest HD index held by any record, if any exist.
    async fn highest_hd_index(&self) -> Result<Option<u64>, LedgerError>;
}

/// A [`PaymentLedger`] held in process memory.
///
/// Each record sits in its own map slot; state transitions run while holding
/// that slot's write lock.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: DashMap<String, PaymentRecord>,
    indexes: DashMap<u64, String>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn not_found(address: &str) -> LedgerError {
        LedgerError::NotFound {
            address: address.to_owned(),
        }
    }
}

/// Accepts `Pending` and `BurnUnconfirmed`, the states a running claim may finish.
fn require_unsettled(record: &PaymentRecord) -> Result<(), LedgerError> {
    match &record.state {
        PaymentState::Pending | PaymentState::BurnUnconfirmed => Ok(()),
        _ => Err(state_conflict(record)),
    }
}

fn state_conflict(record: &PaymentRecord) -> LedgerError {
    let address = record.address.clone();
    match &record.state {
        PaymentState::Pending => LedgerError::NotOrphaned { address },
        PaymentState::BurnUnconfirmed => LedgerError::BurnUnconfirmed { address },
        PaymentState::Claimed { .. } => LedgerError::AlreadyClaimed { address },
        PaymentState::BurnOrphaned { proof_of_burn_txid } => LedgerError::BurnOrphaned {
            address,
            proof_of_burn_txid: proof_of_burn_txid.clone(),
        },
    }
}

#[async_trait]
impl PaymentLedger for InMemoryLedger {
    async fn create(&self, record: PaymentRecord) -> Result<(), LedgerError> {
        match self.indexes.entry(record.hd_index) {
            Entry::Occupied(_) => {
                return Err(LedgerError::DuplicateIndex {
                    address: record.address,
                    hd_index: record.hd_index,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(record.address.clone());
            }
        }
        let hd_index = record.hd_index;
        match self.records.entry(record.address.clone()) {
            Entry::Occupied(_) => {
                self.indexes.remove(&hd_index);
                Err(LedgerError::DuplicateAddress {
                    address: record.address,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn find_by_address(&self, address: &str) -> Result<PaymentRecord, LedgerError> {
        self.records
            .get(address)
            .map(|r| r.value().clone())
            .ok_or_else(|| Self::not_found(address))
    }

    async fn mark_sweep_attempted(&self, address: &str) -> Result<(), LedgerError> {
        let mut record = self
            .records
            .get_mut(address)
            .ok_or_else(|| Self::not_found(address))?;
        record.check_pending()?;
        record.sweep_attempted = true;
        Ok(())
    }

    async fn record_sweep(&self, address: &str, sweep_txid: &str) -> Result<(), LedgerError> {
        let mut record = self
            .records
            .get_mut(address)
            .ok_or_else(|| Self::not_found(address))?;
        record.check_pending()?;
        match &record.sweep_txid {
            Some(existing) if existing == sweep_txid => Ok(()),
            Some(existing) => Err(LedgerError::SweepAlreadyRecorded {
                address: address.to_owned(),
                sweep_txid: existing.clone(),
            }),
            None => {
                record.sweep_txid = Some(sweep_txid.to_owned());
                Ok(())
            }
        }
    }

    async fn mark_burn_attempted(&self, address: &str) -> Result<(), LedgerError> {
        let mut record = self
            .records
            .get_mut(address)
            .ok_or_else(|| Self::not_found(address))?;
        record.check_pending()?;
        record.state = PaymentState::BurnUnconfirmed;
        Ok(())
    }

    async fn reset_burn_attempt(&self, address: &str) -> Result<(), LedgerError> {
        let mut record = self
            .records
            .get_mut(address)
            .ok_or_else(|| Self::not_found(address))?;
        if record.state != PaymentState::BurnUnconfirmed {
            return Err(state_conflict(&record));
        }
        record.state = PaymentState::Pending;
        Ok(())
    }

    async fn mark_claimed(
        &self,
        address: &str,
        proof_of_burn_txid: &str,
        claim_txid: &str,
    ) -> Result<PaymentRecord, LedgerError> {
        let mut record = self
            .records
            .get_mut(address)
            .ok_or_else(|| Self::not_found(address))?;
        require_unsettled(&record)?;
        record.state = PaymentState::Claimed {
            proof_of_burn_txid: proof_of_burn_txid.to_owned(),
            claim_txid: claim_txid.to_owned(),
        };
        Ok(record.clone())
    }

    async fn mark_burn_orphaned(
        &self,
        address: &str,
        proof_of_burn_txid: &str,
    ) -> Result<(), LedgerError> {
        let mut record = self
            .records
            .get_mut(address)
            .ok_or_else(|| Self::not_found(address))?;
        require_unsettled(&record)?;
        record.state = PaymentState::BurnOrphaned {
            proof_of_burn_txid: proof_of_burn_txid.to_owned(),
        };
        Ok(())
    }

    async fn complete_orphaned(
        &self,
        address: &str,
        claim_txid: &str,
    ) -> Result<PaymentRecord, LedgerError> {
        let mut record = self
            .records
            .get_mut(address)
            .ok_or_else(|| Self::not_found(address))?;
        let proof_of_burn_txid = match &record.state {
            PaymentState::BurnOrphaned { proof_of_burn_txid } => proof_of_burn_txid.clone(),
            PaymentState::Claimed { .. } => {
                return Err(LedgerError::AlreadyClaimed {
                    address: address.to_owned(),
                });
            }
            PaymentState::Pending | PaymentState::BurnUnconfirmed => {
                return Err(LedgerError::NotOrphaned {
                    address: address.to_owned(),
                });
            }
        };
        record.state = PaymentState::Claimed {
            proof_of_burn_txid,
            claim_txid: claim_txid.to_owned(),
        };
        Ok(record.clone())
    }

    async fn highest_hd_index(&self) -> Result<Option<u64>, LedgerError> {
        Ok(self.indexes.iter().map(|entry| *entry.key()).max())
    }
}
