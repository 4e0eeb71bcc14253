//! Wallet collaborator boundary.
//!
//! The [`Wallet`] trait is everything the lifecycle needs from the
//! hierarchical deterministic wallet and the chain it talks to: key
//! derivation, balance lookups, transaction construction, and broadcast.
//! Key-derivation internals and the transaction wire format stay behind this
//! trait.

use std::fmt;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Private key for a single-use payment address (WIF or equivalent encoding).
///
/// The `Debug` and `Display` implementations never print the key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivateKeyMaterial(String);

impl PrivateKeyMaterial {
    /// Wraps an encoded private key.
    #[must_use]
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Returns the encoded key for handing to the wallet.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKeyMaterial(<redacted>)")
    }
}

impl fmt::Display for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// A derived address and its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Cash address that receives the payment.
    pub address: String,
    /// Key that can spend from `address`.
    pub private_key: PrivateKeyMaterial,
}

/// A signed, serialized transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    hex: String,
}

impl SignedTransaction {
    /// Wraps a hex-encoded transaction.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self { hex: hex.into() }
    }

    /// Returns the hex encoding.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

/// Errors reported by a [`Wallet`] implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletError {
    /// The wallet backend or chain indexer could not be reached.
    #[error("wallet backend unavailable: {0}")]
    Unavailable(String),
    /// The network refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// Nothing spendable at the address (already swept or never funded).
    #[error("no spendable funds: {0}")]
    NoSpendableFunds(String),
    /// The key could not be used to sign.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Hierarchical deterministic wallet and chain access.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Derives the key pair at `index` of the payment derivation path.
    ///
    /// Derivation is deterministic: the same index always yields the same
    /// address, which is why indexes must never be reused.
    async fn derive_key_pair(&self, index: u64) -> Result<KeyPair, WalletError>;

    /// Returns the confirmed plus unconfirmed coin balance of `address`.
    async fn balance(&self, address: &str) -> Result<Decimal, WalletError>;

    /// Builds a transaction moving every coin and storage-token output held
    /// by the key's address to `destination`.
    async fn build_sweep(
        &self,
        key: &PrivateKeyMaterial,
        destination: &str,
    ) -> Result<SignedTransaction, WalletError>;

    /// Builds a transaction burning `tokens` storage tokens from the
    /// operator wallet as pin collateral.
    async fn build_proof_of_burn(&self, tokens: Decimal) -> Result<SignedTransaction, WalletError>;

    /// Builds the pin-claim transaction that references a proof-of-burn.
    async fn build_claim(
        &self,
        proof_of_burn_txid: &str,
        content_id: &str,
        filename: &str,
    ) -> Result<SignedTransaction, WalletError>;

    /// Broadcasts a signed transaction, returning its transaction id.
    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, WalletError>;
}
