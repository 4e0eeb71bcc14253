//! Transport-agnostic entry point for the pin-claim lifecycle.
//!
//! [`PinClaimService`] wires the cost calculator, address allocator, ledger,
//! verifier, sweeper, claim issuer, and staging registry together and exposes
//! the operations a web or RPC layer calls:
//!
//! | Operation | Effect |
//! |---|---|
//! | [`get_quote`](PinClaimService::get_quote) | Prices a size and allocates a payment address |
//! | [`get_cost`](PinClaimService::get_cost) | Prices a size only |
//! | [`create_claim`](PinClaimService::create_claim) | Verify, sweep, burn, claim |
//! | [`resume_orphaned_claim`](PinClaimService::resume_orphaned_claim) | Operator recovery of an orphaned burn |
//! | [`reconcile_unconfirmed_burn`](PinClaimService::reconcile_unconfirmed_burn) | Operator settlement of an unanswered burn |
//! | [`stage_upload`](PinClaimService::stage_upload) | Adds an upload to the store and stages it |
//! | [`stat_object`](PinClaimService::stat_object) | Reads an object's size |
//! | [`run_eviction_sweep`](PinClaimService::run_eviction_sweep) | Drops expired staged objects |

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::allocator::{AddressAllocator, IndexSequence, LedgerIndexSequence};
use crate::boundary::{bounded, within};
use crate::claim::{PinClaim, PinClaimIssuer};
use crate::config::{ConfigError, PinClaimConfig};
use crate::cost::CostCalculator;
use crate::error::PinClaimError;
use crate::eviction::EvictionTask;
use crate::ledger::{PaymentLedger, PaymentRecord, PaymentState};
use crate::oracle::PriceOracle;
use crate::staging::{EvictionReport, StagedObjectRegistry};
use crate::store::{AddOptions, ContentStore, ObjectStat, StoreError};
use crate::sweeper::FundSweeper;
use crate::timestamp::UnixTimestamp;
use crate::verifier::{FundingStatus, PaymentVerifier};
use crate::wallet::Wallet;

const MAX_ADDRESS_LEN: usize = 128;
const MAX_CONTENT_ID_LEN: usize = 128;
const MAX_FILENAME_LEN: usize = 255;

/// External systems the service depends on.
pub struct Collaborators {
    /// Storage price and exchange rates.
    pub oracle: Arc<dyn PriceOracle>,
    /// HD wallet and chain access.
    pub wallet: Arc<dyn Wallet>,
    /// Durable payment records.
    pub ledger: Arc<dyn PaymentLedger>,
    /// Content node holding staged objects.
    pub store: Arc<dyn ContentStore>,
    /// Index source for address derivation. Defaults to a
    /// [`LedgerIndexSequence`] over `ledger`.
    pub sequence: Option<Arc<dyn IndexSequence>>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Answer to a quote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentQuote {
    /// Single-use address to fund.
    pub address: String,
    /// Coins to send to `address`.
    pub coin_cost: Decimal,
}

/// Answer to an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedUpload {
    /// Content id assigned by the store.
    pub content_id: String,
    /// Upload size in bytes.
    pub size: u64,
}

/// The pin-claim lifecycle behind one configuration.
pub struct PinClaimService {
    config: PinClaimConfig,
    cost: Arc<CostCalculator>,
    allocator: AddressAllocator,
    ledger: Arc<dyn PaymentLedger>,
    verifier: PaymentVerifier,
    sweeper: FundSweeper,
    issuer: PinClaimIssuer,
    store: Arc<dyn ContentStore>,
    registry: Arc<StagedObjectRegistry>,
    claim_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for PinClaimService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinClaimService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PinClaimService {
    /// Builds the service.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` fails validation.
    pub fn new(config: PinClaimConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        let Collaborators {
            oracle,
            wallet,
            ledger,
            store,
            sequence,
        } = collaborators;
        let timeout = config.collaborator_timeout();
        let sequence = sequence
            .unwrap_or_else(|| Arc::new(LedgerIndexSequence::new(Arc::clone(&ledger))));

        let cost = Arc::new(CostCalculator::new(oracle, config.cost_policy(), timeout));
        let allocator = AddressAllocator::new(Arc::clone(&wallet), sequence, timeout);
        let verifier = PaymentVerifier::new(Arc::clone(&wallet), timeout);
        let sweeper = FundSweeper::new(Arc::clone(&wallet), config.operator_address.clone(), timeout);
        let issuer = PinClaimIssuer::new(wallet, Arc::clone(&ledger), Arc::clone(&cost), timeout);
        let registry = Arc::new(StagedObjectRegistry::new(Arc::clone(&store), timeout));

        Ok(Self {
            config,
            cost,
            allocator,
            ledger,
            verifier,
            sweeper,
            issuer,
            store,
            registry,
            claim_locks: DashMap::new(),
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PinClaimConfig {
        &self.config
    }

    /// Staging registry shared with the eviction task.
    #[must_use]
    pub fn registry(&self) -> &Arc<StagedObjectRegistry> {
        &self.registry
    }

    /// Quotes `size_mb` and allocates a payment address for it.
    ///
    /// # Errors
    ///
    /// [`PinClaimError::PaymentsDisabled`], the errors of
    /// [`get_cost`](Self::get_cost), and allocation or ledger failures.
    pub async fn get_quote(&self, size_mb: Decimal) -> Result<PaymentQuote, PinClaimError> {
        self.require_payments()?;
        let coin_cost = self.cost.quote(size_mb).await?;
        let allocated = self.allocator.allocate().await?;
        let address = allocated.address.clone();

        let record = PaymentRecord::new(
            allocated.address,
            allocated.private_key,
            coin_cost,
            size_mb,
            allocated.hd_index,
            UnixTimestamp::now(),
        );
        self.timed("create record", &address, self.ledger.create(record))
            .await??;

        tracing::info!(
            address = %address,
            hd_index = allocated.hd_index,
            %size_mb,
            %coin_cost,
            "issued payment quote"
        );
        Ok(PaymentQuote { address, coin_cost })
    }

    /// [`get_quote`](Self::get_quote) bounded by a caller deadline.
    ///
    /// # Errors
    ///
    /// [`PinClaimError::DeadlineExceeded`] when `deadline` elapses first.
    pub async fn get_quote_within(
        &self,
        deadline: Duration,
        size_mb: Decimal,
    ) -> Result<PaymentQuote, PinClaimError> {
        within(deadline, "get quote", self.get_quote(size_mb)).await
    }

    /// Coin cost of storing `size_mb` megabytes, without allocating an address.
    ///
    /// # Errors
    ///
    /// [`PinClaimError::InvalidSize`] or [`PinClaimError::RateUnavailable`].
    pub async fn get_cost(&self, size_mb: Decimal) -> Result<Decimal, PinClaimError> {
        self.cost.quote(size_mb).await
    }

    /// Settles the payment at `address` and claims `content_id`.
    ///
    /// Runs verify, sweep, proof-of-burn and claim while holding the
    /// address's claim lock. A retry after a failed burn or claim skips the
    /// sweep if its txid was recorded. On success the content id is released
    /// from the staging registry.
    ///
    /// # Errors
    ///
    /// - Invalid input: address, content id, or filename malformed
    /// - [`PinClaimError::PaymentsDisabled`]
    /// - [`PinClaimError::RecordNotFound`] or [`PinClaimError::AlreadyClaimed`]
    /// - [`PinClaimError::Underfunded`] with the record left `Pending`
    /// - [`PinClaimError::InsufficientFunds`] if the address was emptied
    /// - [`PinClaimError::OrphanedBurn`] if collateral was burned without a
    ///   recorded claim, now or in an earlier attempt
    /// - collaborator failures, which are retryable
    pub async fn create_claim(
        &self,
        address: &str,
        content_id: &str,
        filename: &str,
    ) -> Result<PinClaim, PinClaimError> {
        self.require_payments()?;
        validate_address(address)?;
        validate_content_id(content_id)?;
        validate_filename(filename)?;

        let lock = self.claim_lock(address);
        let result = {
            let _guard = lock.lock().await;
            self.claim_locked(address, content_id, filename).await
        };
        self.drop_claim_lock(address, lock);
        result
    }

    /// [`create_claim`](Self::create_claim) bounded by a caller deadline.
    ///
    /// Steps committed before the deadline stay recorded on the ledger.
    ///
    /// # Errors
    ///
    /// [`PinClaimError::DeadlineExceeded`] when `deadline` elapses first.
    pub async fn create_claim_within(
        &self,
        deadline: Duration,
        address: &str,
        content_id: &str,
        filename: &str,
    ) -> Result<PinClaim, PinClaimError> {
        within(
            deadline,
            "create claim",
            self.create_claim(address, content_id, filename),
        )
        .await
    }

    /// Broadcasts the missing claim for a record stuck in `BurnOrphaned`.
    ///
    /// Operator-only; nothing calls it automatically.
    ///
    /// # Errors
    ///
    /// [`PinClaimError::NotOrphaned`] unless the record holds an orphaned
    /// burn, plus the errors of the claim broadcast.
    pub async fn resume_orphaned_claim(
        &self,
        address: &str,
        content_id: &str,
        filename: &str,
    ) -> Result<PinClaim, PinClaimError> {
        validate_address(address)?;
        validate_content_id(content_id)?;
        validate_filename(filename)?;

        let lock = self.claim_lock(address);
        let result = {
            let _guard = lock.lock().await;
            match self.find_record(address).await {
                Ok(record) => self.issuer.resume_orphaned(&record, content_id, filename).await,
                Err(err) => Err(err),
            }
        };
        self.drop_claim_lock(address, lock);

        if result.is_ok() {
            self.registry.release(content_id).await;
        }
        result
    }

    /// Settles a record left `BurnUnconfirmed` by a proof-of-burn broadcast
    /// that never answered.
    ///
    /// Pass the burn's txid if the operator found it on chain; the record
    /// becomes `BurnOrphaned` and [`resume_orphaned_claim`](Self::resume_orphaned_claim)
    /// finishes it. Pass `None` if the burn never reached the chain; the
    /// record returns to `Pending` and the claim may be retried.
    ///
    /// Operator-only; nothing calls it automatically.
    ///
    /// # Errors
    ///
    /// [`PinClaimError::NotOrphaned`] unless the record is `BurnUnconfirmed`,
    /// plus ledger failures.
    pub async fn reconcile_unconfirmed_burn(
        &self,
        address: &str,
        proof_of_burn_txid: Option<&str>,
    ) -> Result<(), PinClaimError> {
        validate_address(address)?;

        let lock = self.claim_lock(address);
        let result = {
            let _guard = lock.lock().await;
            self.reconcile_locked(address, proof_of_burn_txid).await
        };
        self.drop_claim_lock(address, lock);
        result
    }

    async fn reconcile_locked(
        &self,
        address: &str,
        proof_of_burn_txid: Option<&str>,
    ) -> Result<(), PinClaimError> {
        let record = self.find_record(address).await?;
        if record.state != PaymentState::BurnUnconfirmed {
            return Err(PinClaimError::NotOrphaned {
                address: address.to_owned(),
            });
        }
        match proof_of_burn_txid {
            Some(txid) => {
                self.timed(
                    "mark burn orphaned",
                    address,
                    self.ledger.mark_burn_orphaned(address, txid),
                )
                .await??;
                tracing::info!(address, proof_of_burn_txid = %txid, "unconfirmed burn found on chain");
            }
            None => {
                self.timed(
                    "reset burn attempt",
                    address,
                    self.ledger.reset_burn_attempt(address),
                )
                .await??;
                tracing::info!(address, "unconfirmed burn never reached the chain");
            }
        }
        Ok(())
    }

    /// Adds an upload to the content store and stages it.
    ///
    /// # Errors
    ///
    /// [`PinClaimError::PayloadTooLarge`] above the configured maximum,
    /// [`PinClaimError::InvalidFilename`], or a store failure.
    pub async fn stage_upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<StagedUpload, PinClaimError> {
        validate_filename(filename)?;
        let size = bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(PinClaimError::PayloadTooLarge {
                size,
                max: self.config.max_upload_bytes,
            });
        }

        let content_id = self
            .timed(
                "add",
                filename,
                self.store.add_object(bytes, filename, &AddOptions::default()),
            )
            .await?
            .map_err(|source| PinClaimError::Storage {
                operation: "add",
                cid: filename.to_owned(),
                source,
            })?;
        self.registry.register(&content_id).await;

        tracing::info!(cid = %content_id, filename, size, "staged upload");
        Ok(StagedUpload { content_id, size })
    }

    /// Reads the stored size of `content_id`.
    ///
    /// # Errors
    ///
    /// [`PinClaimError::ObjectNotFound`] if the store does not hold the object.
    pub async fn stat_object(&self, content_id: &str) -> Result<ObjectStat, PinClaimError> {
        validate_content_id(content_id)?;
        self.timed("stat", content_id, self.store.stat(content_id))
            .await?
            .map_err(|source| match source {
                StoreError::NotFound(_) => PinClaimError::ObjectNotFound {
                    cid: content_id.to_owned(),
                },
                source => PinClaimError::Storage {
                    operation: "stat",
                    cid: content_id.to_owned(),
                    source,
                },
            })
    }

    /// Evicts staged objects older than the configured TTL.
    pub async fn run_eviction_sweep(&self) -> EvictionReport {
        self.registry
            .sweep_expired(UnixTimestamp::now(), self.config.staging_ttl())
            .await
    }

    /// Starts the periodic eviction task.
    #[must_use]
    pub fn spawn_eviction_task(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        EvictionTask::spawn(
            Arc::clone(&self.registry),
            self.config.eviction_interval(),
            self.config.staging_ttl(),
            shutdown,
        )
    }

    async fn claim_locked(
        &self,
        address: &str,
        content_id: &str,
        filename: &str,
    ) -> Result<PinClaim, PinClaimError> {
        let record = self.find_record(address).await?;
        record
            .check_pending()
            .map_err(|conflict| naming_content(conflict.into(), content_id))?;

        let held = self.registry.hold(content_id).await;
        let result = self.settle(&record, content_id, filename).await;
        match &result {
            Ok(_) => {
                self.registry.release(content_id).await;
            }
            Err(PinClaimError::OrphanedBurn { .. } | PinClaimError::BurnUnconfirmed { .. }) => {
                if held {
                    tracing::warn!(address, cid = %content_id, "staged object kept until the burn is reconciled");
                }
            }
            Err(_) => {
                if held {
                    self.registry.unhold(content_id).await;
                }
            }
        }
        result
    }

    async fn settle(
        &self,
        record: &PaymentRecord,
        content_id: &str,
        filename: &str,
    ) -> Result<PinClaim, PinClaimError> {
        let address = record.address.as_str();
        if let Some(sweep_txid) = &record.sweep_txid {
            tracing::info!(address, %sweep_txid, "sweep already recorded; resuming claim");
        } else {
            match self.verifier.verify(record).await? {
                FundingStatus::Funded { .. } => {}
                FundingStatus::Underfunded { balance, .. }
                    if record.sweep_attempted && balance.is_zero() =>
                {
                    tracing::warn!(address, "address emptied by an earlier sweep with no recorded txid");
                    return Err(PinClaimError::InsufficientFunds {
                        address: address.to_owned(),
                    });
                }
                FundingStatus::Underfunded { balance, .. } => {
                    return Err(PinClaimError::Underfunded {
                        address: address.to_owned(),
                        balance,
                        quoted: record.quoted_cost,
                    });
                }
            }

            self.timed(
                "mark sweep attempted",
                address,
                self.ledger.mark_sweep_attempted(address),
            )
            .await??;
            let sweep_txid = self.sweeper.sweep(record).await?;
            if let Err(err) = self
                .timed("record sweep", address, self.ledger.record_sweep(address, &sweep_txid))
                .await
                .and_then(|r| r.map_err(PinClaimError::from))
            {
                tracing::error!(address, %sweep_txid, error = %err, "sweep broadcast but not recorded");
                return Err(err);
            }
        }

        self.issuer.issue_claim(record, content_id, filename).await
    }

    async fn find_record(&self, address: &str) -> Result<PaymentRecord, PinClaimError> {
        Ok(self
            .timed("find record", address, self.ledger.find_by_address(address))
            .await??)
    }

    async fn timed<F>(
        &self,
        operation: &'static str,
        target: &str,
        fut: F,
    ) -> Result<F::Output, PinClaimError>
    where
        F: Future,
    {
        bounded(self.config.collaborator_timeout(), operation, target, fut).await
    }

    fn require_payments(&self) -> Result<(), PinClaimError> {
        if self.config.enable_payments {
            Ok(())
        } else {
            Err(PinClaimError::PaymentsDisabled)
        }
    }

    fn claim_lock(&self, address: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.claim_locks.entry(address.to_owned()).or_default())
    }

    /// Forgets the lock for `address` once no other caller holds it.
    fn drop_claim_lock(&self, address: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.claim_locks
            .remove_if(address, |_, held| Arc::strong_count(held) == 1);
    }
}

fn validate_address(address: &str) -> Result<(), PinClaimError> {
    let valid = !address.is_empty()
        && address.len() <= MAX_ADDRESS_LEN
        && address.chars().all(|c| c.is_ascii_alphanumeric() || c == ':');
    if valid {
        Ok(())
    } else {
        Err(PinClaimError::InvalidAddress {
            address: address.to_owned(),
        })
    }
}

fn validate_content_id(cid: &str) -> Result<(), PinClaimError> {
    let valid = !cid.is_empty()
        && cid.len() <= MAX_CONTENT_ID_LEN
        && cid.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(PinClaimError::InvalidContentId {
            cid: cid.to_owned(),
        })
    }
}

fn validate_filename(filename: &str) -> Result<(), PinClaimError> {
    let valid = !filename.trim().is_empty()
        && filename.len() <= MAX_FILENAME_LEN
        && filename != "."
        && filename != ".."
        && !filename.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(PinClaimError::InvalidFilename {
            filename: filename.to_owned(),
        })
    }
}

/// Attaches `content_id` to burn errors raised from ledger state.
fn naming_content(err: PinClaimError, content_id: &str) -> PinClaimError {
    match err {
        PinClaimError::OrphanedBurn {
            address,
            content_id: None,
            proof_of_burn_txid,
            cause,
        } => PinClaimError::OrphanedBurn {
            address,
            content_id: Some(content_id.to_owned()),
            proof_of_burn_txid,
            cause,
        },
        PinClaimError::BurnUnconfirmed {
            address,
            content_id: None,
            cause,
        } => PinClaimError::BurnUnconfirmed {
            address,
            content_id: Some(content_id.to_owned()),
            cause,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AtomicIndexSequence;
    use crate::error::{ErrorKind, TxStage};
    use crate::ledger::InMemoryLedger;
    use crate::oracle::ExchangeRates;
    use crate::testing::{FixedOracle, MemoryStore, MockWallet};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct Harness {
        wallet: Arc<MockWallet>,
        oracle: Arc<FixedOracle>,
        ledger: Arc<InMemoryLedger>,
        store: Arc<MemoryStore>,
        service: Arc<PinClaimService>,
    }

    fn config() -> PinClaimConfig {
        PinClaimConfig {
            operator_address: "bitcoincash:qoperator".to_owned(),
            markup: dec("0.1"),
            network_fee: dec("0.00001"),
            collaborator_timeout_secs: 5,
            ..PinClaimConfig::default()
        }
    }

    fn harness_with(config: PinClaimConfig) -> Harness {
        let wallet = Arc::new(MockWallet::new());
        let oracle = Arc::new(FixedOracle::new(
            dec("0.01"),
            ExchangeRates {
                fiat_per_coin: dec("100"),
                fiat_per_token: Decimal::ONE,
            },
        ));
        let ledger = Arc::new(InMemoryLedger::new());
        let store = Arc::new(MemoryStore::new());
        let service = PinClaimService::new(
            config,
            Collaborators {
                oracle: Arc::clone(&oracle) as Arc<dyn PriceOracle>,
                wallet: Arc::clone(&wallet) as Arc<dyn Wallet>,
                ledger: Arc::clone(&ledger) as Arc<dyn PaymentLedger>,
                store: Arc::clone(&store) as Arc<dyn ContentStore>,
                sequence: None,
            },
        )
        .unwrap();
        Harness {
            wallet,
            oracle,
            ledger,
            store,
            service: Arc::new(service),
        }
    }

    fn harness() -> Harness {
        harness_with(config())
    }

    /// Quotes one megabyte and funds the address with exactly the quote.
    async fn funded_quote(h: &Harness) -> PaymentQuote {
        let quote = h.service.get_quote(Decimal::ONE).await.unwrap();
        h.wallet.set_balance(&quote.address, quote.coin_cost);
        quote
    }

    #[tokio::test]
    async fn test_quote_creates_pending_record() {
        let h = harness();
        let quote = h.service.get_quote(Decimal::ONE).await.unwrap();
        assert_eq!(quote.coin_cost, dec("0.00012"));
        assert_eq!(quote.address, "bitcoincash:qtest0");

        let record = h.ledger.find_by_address(&quote.address).await.unwrap();
        assert!(record.is_pending());
        assert_eq!(record.quoted_cost, dec("0.00012"));
        assert_eq!(record.hd_index, 0);

        let second = h.service.get_quote(dec("2")).await.unwrap();
        assert_eq!(second.address, "bitcoincash:qtest1");
    }

    #[tokio::test]
    async fn test_quote_rejects_bad_size_without_allocating() {
        let h = harness();
        let err = h.service.get_quote(Decimal::ZERO).await.unwrap_err();
        assert!(matches!(err, PinClaimError::InvalidSize { .. }));
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_get_cost_does_not_allocate() {
        let h = harness();
        assert_eq!(h.service.get_cost(dec("0.5")).await.unwrap(), dec("0.00012"));
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_oracle_outage_is_retryable() {
        let h = harness();
        h.oracle.fail(true);
        let err = h.service.get_quote(Decimal::ONE).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CollaboratorUnavailable);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_payments_disabled() {
        let h = harness_with(PinClaimConfig {
            enable_payments: false,
            ..config()
        });
        let err = h.service.get_quote(Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, PinClaimError::PaymentsDisabled));
        let err = h
            .service
            .create_claim("bitcoincash:qtest0", "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::PaymentsDisabled));
        assert!(h.service.get_cost(Decimal::ONE).await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_on_funded_address() {
        let h = harness();
        let staged = h.service.stage_upload(b"hello".to_vec(), "a.txt").await.unwrap();
        let quote = funded_quote(&h).await;

        let claim = h
            .service
            .create_claim(&quote.address, &staged.content_id, "a.txt")
            .await
            .unwrap();

        let record = h.ledger.find_by_address(&quote.address).await.unwrap();
        assert_eq!(record.proof_of_burn_txid(), Some(claim.proof_of_burn_txid.as_str()));
        assert_eq!(record.claim_txid(), Some(claim.claim_txid.as_str()));
        assert!(record.sweep_txid.is_some());
        assert_eq!(h.wallet.sweep_broadcasts(), 1);
        assert!(!h.service.registry().contains(&staged.content_id).await);
    }

    #[tokio::test]
    async fn test_unfunded_claim_is_underfunded() {
        let h = harness_with(PinClaimConfig {
            markup: dec("3.1"),
            network_fee: dec("0.00009"),
            ..config()
        });
        let quote = h.service.get_quote(Decimal::ONE).await.unwrap();
        assert_eq!(quote.coin_cost, dec("0.0005"));

        let err = h
            .service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();
        match err {
            PinClaimError::Underfunded { balance, quoted, .. } => {
                assert_eq!(balance, Decimal::ZERO);
                assert_eq!(quoted, dec("0.0005"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(h.ledger.find_by_address(&quote.address).await.unwrap().is_pending());
        assert_eq!(h.wallet.sweep_broadcasts(), 0);
    }

    #[tokio::test]
    async fn test_second_claim_is_rejected() {
        let h = harness();
        let quote = funded_quote(&h).await;
        h.service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap();

        let err = h
            .service
            .create_claim(&quote.address, "bafyother", "b.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::AlreadyClaimed { .. }));
        assert_eq!(h.wallet.burn_broadcasts(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_burn_once() {
        let h = harness();
        let quote = funded_quote(&h).await;

        let attempts = (0..8).map(|_| {
            let service = Arc::clone(&h.service);
            let address = quote.address.clone();
            tokio::spawn(async move { service.create_claim(&address, "bafyfile", "a.txt").await })
        });
        let results = futures_util::future::join_all(attempts).await;
        let successes = results
            .into_iter()
            .filter(|r| r.as_ref().unwrap().is_ok())
            .count();

        assert_eq!(successes, 1);
        assert_eq!(h.wallet.sweep_broadcasts(), 1);
        assert_eq!(h.wallet.burn_broadcasts(), 1);
        assert!(h.service.claim_locks.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_address() {
        let h = harness();
        let err = h
            .service
            .create_claim("bitcoincash:qnobody", "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn test_claim_failure_orphans_and_retry_does_not_burn_again() {
        let h = harness();
        let quote = funded_quote(&h).await;
        h.wallet.fail_claim_broadcast(true);

        let err = h
            .service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OrphanedBurn);
        let record = h.ledger.find_by_address(&quote.address).await.unwrap();
        assert!(matches!(record.state, PaymentState::BurnOrphaned { .. }));

        h.wallet.fail_claim_broadcast(false);
        let err = h
            .service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::OrphanedBurn { .. }));
        assert_eq!(h.wallet.burn_broadcasts(), 1);
        assert_eq!(h.wallet.claim_broadcasts(), 0);

        let claim = h
            .service
            .resume_orphaned_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap();
        assert_eq!(Some(claim.proof_of_burn_txid.as_str()), record.proof_of_burn_txid());
        assert_eq!(h.wallet.burn_broadcasts(), 1);
        assert!(h.ledger.find_by_address(&quote.address).await.unwrap().is_claimed());
    }

    #[tokio::test]
    async fn test_retry_after_burn_failure_skips_sweep() {
        let h = harness();
        let quote = funded_quote(&h).await;
        h.wallet.fail_burn_broadcast(true);

        let err = h
            .service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PinClaimError::BroadcastFailed {
                stage: TxStage::ProofOfBurn,
                ..
            }
        ));
        let record = h.ledger.find_by_address(&quote.address).await.unwrap();
        assert!(record.is_pending());
        assert!(record.sweep_txid.is_some());

        h.wallet.fail_burn_broadcast(false);
        h.service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap();
        assert_eq!(h.wallet.sweep_broadcasts(), 1);
        assert_eq!(h.wallet.burn_broadcasts(), 1);
    }

    fn short_timeout() -> PinClaimConfig {
        PinClaimConfig {
            collaborator_timeout_secs: 1,
            ..config()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_landing_without_reply_is_insufficient_funds_on_retry() {
        let h = harness_with(short_timeout());
        let quote = funded_quote(&h).await;
        h.wallet.lose_reply(TxStage::Sweep, Duration::from_secs(10));

        let err = h
            .service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::Timeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(h.wallet.sweep_broadcasts(), 1);
        assert!(h.wallet.balance_of(&quote.address).is_zero());

        let err = h
            .service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::InsufficientFunds { .. }));
        let record = h.ledger.find_by_address(&quote.address).await.unwrap();
        assert!(record.is_pending());
        assert!(record.sweep_attempted);
        assert!(record.sweep_txid.is_none());
        assert_eq!(h.wallet.sweep_broadcasts(), 1);
        assert_eq!(h.wallet.burn_broadcasts(), 0);
    }

    #[tokio::test]
    async fn test_never_swept_empty_address_stays_underfunded() {
        let h = harness();
        let quote = h.service.get_quote(Decimal::ONE).await.unwrap();
        let err = h
            .service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::Underfunded { .. }));
        assert!(!h.ledger.find_by_address(&quote.address).await.unwrap().sweep_attempted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burn_landing_without_reply_is_never_rebroadcast() {
        let h = harness_with(short_timeout());
        let staged = h.service.stage_upload(b"hello".to_vec(), "a.txt").await.unwrap();
        let quote = funded_quote(&h).await;
        h.wallet.lose_reply(TxStage::ProofOfBurn, Duration::from_secs(10));

        let err = h
            .service
            .create_claim(&quote.address, &staged.content_id, "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::BurnUnconfirmed { .. }));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::OrphanedBurn);
        let record = h.ledger.find_by_address(&quote.address).await.unwrap();
        assert_eq!(record.state, PaymentState::BurnUnconfirmed);
        assert_eq!(h.wallet.burn_broadcasts(), 1);

        h.wallet.restore_replies(TxStage::ProofOfBurn);
        let err = h
            .service
            .create_claim(&quote.address, &staged.content_id, "a.txt")
            .await
            .unwrap_err();
        match err {
            PinClaimError::BurnUnconfirmed { content_id, .. } => {
                assert_eq!(content_id.as_deref(), Some(staged.content_id.as_str()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.wallet.burn_broadcasts(), 1);

        let report = h
            .service
            .registry()
            .sweep_expired(UnixTimestamp::now() + 3600, Duration::ZERO)
            .await;
        assert!(report.evicted.is_empty());
        assert!(h.service.registry().contains(&staged.content_id).await);

        h.service
            .reconcile_unconfirmed_burn(&quote.address, Some("tx-burn-1"))
            .await
            .unwrap();
        let claim = h
            .service
            .resume_orphaned_claim(&quote.address, &staged.content_id, "a.txt")
            .await
            .unwrap();
        assert_eq!(claim.proof_of_burn_txid, "tx-burn-1");
        assert_eq!(h.wallet.burn_broadcasts(), 1);
        assert!(h.ledger.find_by_address(&quote.address).await.unwrap().is_claimed());
        assert!(!h.service.registry().contains(&staged.content_id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_burn_that_never_landed() {
        let h = harness_with(short_timeout());
        let quote = funded_quote(&h).await;
        h.wallet.lose_reply(TxStage::ProofOfBurn, Duration::from_secs(10));
        h.service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();

        h.service
            .reconcile_unconfirmed_burn(&quote.address, None)
            .await
            .unwrap();
        assert!(h.ledger.find_by_address(&quote.address).await.unwrap().is_pending());
        let err = h
            .service
            .reconcile_unconfirmed_burn(&quote.address, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::NotOrphaned { .. }));

        h.wallet.restore_replies(TxStage::ProofOfBurn);
        h.service
            .create_claim(&quote.address, "bafyfile", "a.txt")
            .await
            .unwrap();
        assert_eq!(h.wallet.sweep_broadcasts(), 1);
        assert!(h.ledger.find_by_address(&quote.address).await.unwrap().is_claimed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_skips_object_under_claim() {
        let h = harness();
        let quote = funded_quote(&h).await;
        h.service
            .registry()
            .register_at("bafyancient", UnixTimestamp::from_secs(0))
            .await;
        h.wallet.delay_broadcasts(Duration::from_secs(1));

        let service = Arc::clone(&h.service);
        let address = quote.address.clone();
        let claim = tokio::spawn(async move {
            service.create_claim(&address, "bafyancient", "a.txt").await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = h.service.run_eviction_sweep().await;
        assert!(report.evicted.is_empty());
        assert!(h.store.removed().is_empty());
        assert!(h.service.registry().contains("bafyancient").await);

        claim.await.unwrap().unwrap();
        assert!(!h.service.registry().contains("bafyancient").await);
        assert!(h.store.removed().is_empty());
    }

    #[tokio::test]
    async fn test_failed_claim_makes_object_evictable_again() {
        let h = harness();
        let quote = h.service.get_quote(Decimal::ONE).await.unwrap();
        h.service
            .registry()
            .register_at("bafyancient", UnixTimestamp::from_secs(0))
            .await;

        let err = h
            .service
            .create_claim(&quote.address, "bafyancient", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::Underfunded { .. }));
        assert!(!h.service.registry().snapshot().await[0].held);

        let report = h.service.run_eviction_sweep().await;
        assert_eq!(report.evicted, vec!["bafyancient".to_owned()]);
        assert_eq!(h.store.removed(), vec!["bafyancient".to_owned()]);
    }

    #[tokio::test]
    async fn test_invalid_claim_inputs() {
        let h = harness();
        let cases = [
            ("", "bafyfile", "a.txt"),
            ("bitcoincash:q test", "bafyfile", "a.txt"),
            ("bitcoincash:qtest0", "", "a.txt"),
            ("bitcoincash:qtest0", "bafy/../x", "a.txt"),
            ("bitcoincash:qtest0", "bafyfile", ""),
            ("bitcoincash:qtest0", "bafyfile", "../etc/passwd"),
        ];
        for (address, cid, filename) in cases {
            let err = h.service.create_claim(address, cid, filename).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{address} {cid} {filename}");
        }
    }

    #[tokio::test]
    async fn test_upload_size_limit() {
        let h = harness();
        let err = h
            .service
            .stage_upload(vec![0; 100_000_001], "big.bin")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PinClaimError::PayloadTooLarge {
                size: 100_000_001,
                max: 100_000_000
            }
        ));

        let staged = h
            .service
            .stage_upload(vec![0; 100_000_000], "big.bin")
            .await
            .unwrap();
        assert_eq!(staged.size, 100_000_000);
        assert!(h.service.registry().contains(&staged.content_id).await);
    }

    #[tokio::test]
    async fn test_stat_object() {
        let h = harness();
        let staged = h.service.stage_upload(b"hello".to_vec(), "a.txt").await.unwrap();

        let stat = h.service.stat_object(&staged.content_id).await.unwrap();
        assert_eq!(stat.size, 5);
        let err = h.service.stat_object("bafymissing").await.unwrap_err();
        assert!(matches!(err, PinClaimError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_eviction_sweep_uses_configured_ttl() {
        let h = harness();
        h.service
            .registry()
            .register_at("bafyancient", UnixTimestamp::from_secs(0))
            .await;
        h.service.stage_upload(b"fresh".to_vec(), "f.txt").await.unwrap();

        let report = h.service.run_eviction_sweep().await;
        assert_eq!(report.evicted, vec!["bafyancient".to_owned()]);
        assert_eq!(h.store.removed(), vec!["bafyancient".to_owned()]);
        assert_eq!(h.service.registry().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_deadline() {
        let h = harness();
        let quote = funded_quote(&h).await;
        h.wallet.delay_broadcasts(Duration::from_secs(2));

        let err = h
            .service
            .create_claim_within(Duration::from_secs(1), &quote.address, "bafyfile", "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, PinClaimError::DeadlineExceeded { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_explicit_sequence() {
        let wallet = Arc::new(MockWallet::new());
        let service = PinClaimService::new(
            config(),
            Collaborators {
                oracle: Arc::new(FixedOracle::new(
                    dec("0.01"),
                    ExchangeRates {
                        fiat_per_coin: dec("100"),
                        fiat_per_token: Decimal::ONE,
                    },
                )),
                wallet,
                ledger: Arc::new(InMemoryLedger::new()),
                store: Arc::new(MemoryStore::new()),
                sequence: Some(Arc::new(AtomicIndexSequence::starting_at(42))),
            },
        )
        .unwrap();
        let quote = service.get_quote(Decimal::ONE).await.unwrap();
        assert_eq!(quote.address, "bitcoincash:qtest42");
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = PinClaimService::new(
            PinClaimConfig {
                operator_address: String::new(),
                ..PinClaimConfig::default()
            },
            Collaborators {
                oracle: Arc::new(FixedOracle::new(
                    Decimal::ONE,
                    ExchangeRates {
                        fiat_per_coin: Decimal::ONE,
                        fiat_per_token: Decimal::ONE,
                    },
                )),
                wallet: Arc::new(MockWallet::new()),
                ledger: Arc::new(InMemoryLedger::new()),
                store: Arc::new(MemoryStore::new()),
                sequence: None,
            },
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
