//! In-process collaborators for unit tests.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;

use crate::error::TxStage;
use crate::ledger::PaymentRecord;
use crate::oracle::{ExchangeRates, OracleError, PriceOracle};
use crate::store::{AddOptions, ContentStore, ObjectStat, StoreError};
use crate::timestamp::UnixTimestamp;
use crate::wallet::{KeyPair, PrivateKeyMaterial, SignedTransaction, Wallet, WalletError};

/// A pending record whose key the [`MockWallet`] can sweep.
pub(crate) fn pending_record(address: &str, hd_index: u64, quoted_cost: Decimal) -> PaymentRecord {
    PaymentRecord::new(
        address,
        PrivateKeyMaterial::new(format!("wif:{address}")),
        quoted_cost,
        Decimal::ONE,
        hd_index,
        UnixTimestamp::from_secs(1_700_000_000),
    )
}

/// Wallet over an in-memory balance table.
///
/// Derived addresses are `bitcoincash:qtest{index}` with key
/// `wif:<address>`. A broadcast sweep empties the swept address.
///
/// [`delay_broadcasts`](Self::delay_broadcasts) waits before a broadcast
/// takes effect; [`lose_reply`](Self::lose_reply) applies the broadcast and
/// then withholds the answer.
#[derive(Debug, Default)]
pub(crate) struct MockWallet {
    balances: DashMap<String, Decimal>,
    burned: Mutex<Vec<Decimal>>,
    fail_balance: AtomicBool,
    fail_sweep: AtomicBool,
    fail_burn: AtomicBool,
    fail_claim: AtomicBool,
    sweeps: AtomicUsize,
    burns: AtomicUsize,
    claims: AtomicUsize,
    broadcast_delay: Mutex<Duration>,
    lost_replies: DashMap<TxStage, Duration>,
}

impl MockWallet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_balance(&self, address: &str, balance: Decimal) {
        self.balances.insert(address.to_owned(), balance);
    }

    pub(crate) fn balance_of(&self, address: &str) -> Decimal {
        self.balances.get(address).map_or(Decimal::ZERO, |b| *b)
    }

    pub(crate) fn fail_balance(&self, fail: bool) {
        self.fail_balance.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_sweep_broadcast(&self, fail: bool) {
        self.fail_sweep.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_burn_broadcast(&self, fail: bool) {
        self.fail_burn.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_claim_broadcast(&self, fail: bool) {
        self.fail_claim.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn delay_broadcasts(&self, delay: Duration) {
        *self.broadcast_delay.lock().unwrap() = delay;
    }

    /// Broadcasts of `stage` land on chain, then answer only after `wait`.
    pub(crate) fn lose_reply(&self, stage: TxStage, wait: Duration) {
        self.lost_replies.insert(stage, wait);
    }

    /// Broadcasts of `stage` answer promptly again.
    pub(crate) fn restore_replies(&self, stage: TxStage) {
        self.lost_replies.remove(&stage);
    }

    pub(crate) fn sweep_broadcasts(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }

    pub(crate) fn burn_broadcasts(&self) -> usize {
        self.burns.load(Ordering::SeqCst)
    }

    pub(crate) fn claim_broadcasts(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    pub(crate) fn burned_tokens(&self) -> Vec<Decimal> {
        self.burned.lock().unwrap().clone()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn derive_key_pair(&self, index: u64) -> Result<KeyPair, WalletError> {
        let address = format!("bitcoincash:qtest{index}");
        Ok(KeyPair {
            private_key: PrivateKeyMaterial::new(format!("wif:{address}")),
            address,
        })
    }

    async fn balance(&self, address: &str) -> Result<Decimal, WalletError> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(WalletError::Unavailable("indexer offline".into()));
        }
        Ok(self.balance_of(address))
    }

    async fn build_sweep(
        &self,
        key: &PrivateKeyMaterial,
        _destination: &str,
    ) -> Result<SignedTransaction, WalletError> {
        let address = key
            .expose()
            .strip_prefix("wif:")
            .ok_or_else(|| WalletError::InvalidKey("unknown key".into()))?;
        if self.balance_of(address).is_zero() {
            return Err(WalletError::NoSpendableFunds(address.to_owned()));
        }
        Ok(SignedTransaction::from_hex(format!("sweep:{address}")))
    }

    async fn build_proof_of_burn(&self, tokens: Decimal) -> Result<SignedTransaction, WalletError> {
        Ok(SignedTransaction::from_hex(format!("burn:{tokens}")))
    }

    async fn build_claim(
        &self,
        proof_of_burn_txid: &str,
        content_id: &str,
        _filename: &str,
    ) -> Result<SignedTransaction, WalletError> {
        Ok(SignedTransaction::from_hex(format!(
            "claim:{proof_of_burn_txid}:{content_id}"
        )))
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> Result<String, WalletError> {
        let delay = *self.broadcast_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let (stage, result) = self.apply(tx);
        let lost = stage.and_then(|stage| self.lost_replies.get(&stage).map(|wait| *wait));
        if let Some(wait) = lost {
            tokio::time::sleep(wait).await;
        }
        result
    }
}

impl MockWallet {
    fn apply(&self, tx: &SignedTransaction) -> (Option<TxStage>, Result<String, WalletError>) {
        let stage = if tx.hex().starts_with("sweep:") {
            Some(TxStage::Sweep)
        } else if tx.hex().starts_with("burn:") {
            Some(TxStage::ProofOfBurn)
        } else if tx.hex().starts_with("claim:") {
            Some(TxStage::Claim)
        } else {
            None
        };
        (stage, self.apply_effect(tx))
    }

    fn apply_effect(&self, tx: &SignedTransaction) -> Result<String, WalletError> {
        if let Some(address) = tx.hex().strip_prefix("sweep:") {
            if self.fail_sweep.load(Ordering::SeqCst) {
                return Err(WalletError::Rejected("mempool full".into()));
            }
            if self.balance_of(address).is_zero() {
                return Err(WalletError::NoSpendableFunds(address.to_owned()));
            }
            self.balances.insert(address.to_owned(), Decimal::ZERO);
            let n = self.sweeps.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("tx-sweep-{n}"))
        } else if let Some(tokens) = tx.hex().strip_prefix("burn:") {
            if self.fail_burn.load(Ordering::SeqCst) {
                return Err(WalletError::Rejected("token balance too low".into()));
            }
            let tokens = Decimal::from_str(tokens)
                .map_err(|e| WalletError::Rejected(e.to_string()))?;
            self.burned.lock().unwrap().push(tokens);
            let n = self.burns.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("tx-burn-{n}"))
        } else if tx.hex().starts_with("claim:") {
            if self.fail_claim.load(Ordering::SeqCst) {
                return Err(WalletError::Unavailable("relay down".into()));
            }
            let n = self.claims.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("tx-claim-{n}"))
        } else {
            Err(WalletError::Rejected(format!("unknown transaction {}", tx.hex())))
        }
    }
}

/// Oracle answering with fixed values.
#[derive(Debug)]
pub(crate) struct FixedOracle {
    price_per_mb: Decimal,
    rates: ExchangeRates,
    fail: AtomicBool,
}

impl FixedOracle {
    pub(crate) fn new(price_per_mb: Decimal, rates: ExchangeRates) -> Self {
        Self {
            price_per_mb,
            rates,
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), OracleError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OracleError::Unavailable("price service returned 503".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PriceOracle for FixedOracle {
    async fn storage_price_per_mb(&self) -> Result<Decimal, OracleError> {
        self.check()?;
        Ok(self.price_per_mb)
    }

    async fn exchange_rates(&self) -> Result<ExchangeRates, OracleError> {
        self.check()?;
        Ok(self.rates)
    }
}

/// Content store holding object sizes in memory.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    objects: DashMap<String, u64>,
    failing_removes: DashSet<String>,
    removed: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_remove(&self, content_id: &str) {
        self.failing_removes.insert(content_id.to_owned());
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn add_object(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &AddOptions,
    ) -> Result<String, StoreError> {
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        filename.hash(&mut hasher);
        options.wrap_with_directory.hash(&mut hasher);
        let content_id = format!("bafy{:016x}", hasher.finish());
        self.objects.insert(content_id.clone(), bytes.len() as u64);
        Ok(content_id)
    }

    async fn stat(&self, content_id: &str) -> Result<ObjectStat, StoreError> {
        self.objects
            .get(content_id)
            .map(|size| ObjectStat {
                content_id: content_id.to_owned(),
                size: *size,
            })
            .ok_or_else(|| StoreError::NotFound(content_id.to_owned()))
    }

    async fn remove(&self, content_id: &str) -> Result<(), StoreError> {
        if self.failing_removes.contains(content_id) {
            return Err(StoreError::Unavailable("node unreachable".into()));
        }
        self.objects.remove(content_id);
        self.removed.lock().unwrap().push(content_id.to_owned());
        Ok(())
    }
}
