//! Single-use payment address allocation.
//!
//! [`AddressAllocator`] pairs an [`IndexSequence`] with the wallet's key
//! derivation. Indexes are drawn from the sequence, never from a cached
//! counter inside the allocator, so the source of truth survives restarts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::boundary::bounded;
use crate::error::PinClaimError;
use crate::ledger::PaymentLedger;
use crate::wallet::{PrivateKeyMaterial, Wallet};

/// Source of HD derivation indexes with atomic increment-and-read.
#[async_trait]
pub trait IndexSequence: Send + Sync {
    /// Returns an index no earlier call has returned.
    async fn next_index(&self) -> Result<u64, PinClaimError>;
}

/// In-process counter for wallets that persist their own index.
#[derive(Debug, Default)]
pub struct AtomicIndexSequence {
    next: AtomicU64,
}

impl AtomicIndexSequence {
    /// Creates a sequence whose first index is `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

#[async_trait]
impl IndexSequence for AtomicIndexSequence {
    async fn next_index(&self) -> Result<u64, PinClaimError> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}

/// Sequence seeded from the ledger's highest recorded index.
///
/// - **First call**: queries [`PaymentLedger::highest_hd_index`] and starts
///   one past it
/// - **Subsequent calls**: increments the cached value locally
/// - **After [`reset`](Self::reset)**: queries the ledger again
///
/// A crash between allocation and record creation can only skip indexes,
/// never hand out one that a persisted record holds.
pub struct LedgerIndexSequence {
    ledger: Arc<dyn PaymentLedger>,
    next: Mutex<Option<u64>>,
}

impl std::fmt::Debug for LedgerIndexSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerIndexSequence").finish_non_exhaustive()
    }
}

impl LedgerIndexSequence {
    /// Creates a sequence backed by `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<dyn PaymentLedger>) -> Self {
        Self {
            ledger,
            next: Mutex::new(None),
        }
    }

    /// Drops the cached value, forcing a ledger query on next use.
    pub async fn reset(&self) {
        *self.next.lock().await = None;
    }
}

#[async_trait]
impl IndexSequence for LedgerIndexSequence {
    async fn next_index(&self) -> Result<u64, PinClaimError> {
        let mut next = self.next.lock().await;
        let index = match *next {
            Some(index) => index,
            None => {
                let highest = self
                    .ledger
                    .highest_hd_index()
                    .await
                    .map_err(PinClaimError::from)?;
                let first = match highest {
                    None => 0,
                    Some(h) => h.checked_add(1).ok_or(exhausted(h))?,
                };
                tracing::debug!(first, "seeded HD index sequence from ledger");
                first
            }
        };
        *next = Some(index.checked_add(1).ok_or(exhausted(index))?);
        Ok(index)
    }
}

/// The index space is used up through `last`.
const fn exhausted(last: u64) -> PinClaimError {
    PinClaimError::IndexRegression {
        issued: last,
        previous: last,
    }
}

/// A freshly derived payment address.
#[derive(Debug, Clone)]
pub struct AllocatedAddress {
    /// Payment address.
    pub address: String,
    /// Key for sweeping `address`.
    pub private_key: PrivateKeyMaterial,
    /// Derivation index of `address`.
    pub hd_index: u64,
}

/// Derives never-reused payment addresses.
///
/// Allocation is serialized: concurrent callers queue on an async mutex, and
/// an index that is not strictly greater than the last one handed out is
/// rejected with [`PinClaimError::IndexRegression`].
pub struct AddressAllocator {
    wallet: Arc<dyn Wallet>,
    sequence: Arc<dyn IndexSequence>,
    last_issued: Mutex<Option<u64>>,
    timeout: Duration,
}

impl std::fmt::Debug for AddressAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressAllocator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AddressAllocator {
    /// Creates an allocator over `wallet` drawing indexes from `sequence`.
    #[must_use]
    pub fn new(
        wallet: Arc<dyn Wallet>,
        sequence: Arc<dyn IndexSequence>,
        timeout: Duration,
    ) -> Self {
        Self {
            wallet,
            sequence,
            last_issued: Mutex::new(None),
            timeout,
        }
    }

    /// Derives the next payment address.
    ///
    /// An index consumed by a failed derivation is skipped, not retried.
    ///
    /// # Errors
    ///
    /// Returns [`PinClaimError::IndexRegression`] if the sequence went
    /// backwards, [`PinClaimError::Wallet`] or [`PinClaimError::Timeout`] if
    /// derivation failed.
    pub async fn allocate(&self) -> Result<AllocatedAddress, PinClaimError> {
        let mut last_issued = self.last_issued.lock().await;
        let hd_index = self.sequence.next_index().await?;
        if let Some(previous) = *last_issued {
            if hd_index <= previous {
                tracing::error!(issued = hd_index, previous, "HD index sequence went backwards");
                return Err(PinClaimError::IndexRegression {
                    issued: hd_index,
                    previous,
                });
            }
        }
        *last_issued = Some(hd_index);

        let key_pair = bounded(
            self.timeout,
            "derive key pair",
            &hd_index.to_string(),
            self.wallet.derive_key_pair(hd_index),
        )
        .await?
        .map_err(|source| PinClaimError::Wallet {
            operation: "derive key pair",
            source,
        })?;

        tracing::debug!(address = %key_pair.address, hd_index, "allocated payment address");
        Ok(AllocatedAddress {
            address: key_pair.address,
            private_key: key_pair.private_key,
            hd_index,
        })
    }
}
