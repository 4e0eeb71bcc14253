#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Payment-gated pin claims for content-addressed storage.
//!
//! This crate allocates single-use payment addresses, quotes storage cost in
//! coins, verifies on-chain funding, sweeps collected funds to the operator,
//! and issues the proof-of-burn and claim transactions that commit storage
//! providers to keep an object. Alongside it, a staging registry tracks
//! uploads nobody has paid for yet and evicts them after a TTL.
//!
//! Chains, price feeds, ledgers and content nodes are reached through the
//! collaborator traits [`Wallet`](wallet::Wallet),
//! [`PriceOracle`](oracle::PriceOracle),
//! [`PaymentLedger`](ledger::PaymentLedger) and
//! [`ContentStore`](store::ContentStore).
//!
//! # Modules
//!
//! - [`allocator`] - HD index sequences and payment address allocation
//! - [`amount`] - Eight-digit truncating coin arithmetic
//! - [`claim`] - Two-phase proof-of-burn and claim issuance
//! - [`config`] - TOML configuration with environment expansion
//! - [`cost`] - Storage cost quotes
//! - [`error`] - Error types and their classification
//! - [`eviction`] - Background eviction task
//! - [`ledger`] - Payment records and their state machine
//! - [`oracle`] - Price oracle boundary
//! - [`service`] - The [`PinClaimService`] façade
//! - [`staging`] - Staged object registry
//! - [`store`] - Content store boundary
//! - [`sweeper`] - Fund sweeping
//! - [`timestamp`] - Unix timestamps
//! - [`verifier`] - Funding verification
//! - [`wallet`] - Wallet boundary

pub mod allocator;
pub mod amount;
mod boundary;
pub mod claim;
pub mod config;
pub mod cost;
pub mod error;
pub mod eviction;
pub mod ledger;
pub mod oracle;
pub mod service;
pub mod staging;
pub mod store;
pub mod sweeper;
pub mod timestamp;
pub mod verifier;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PinClaimConfig;
pub use error::{ErrorKind, PinClaimError};
pub use service::{Collaborators, PaymentQuote, PinClaimService, StagedUpload};
