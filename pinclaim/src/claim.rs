//! Pin claim issuance.
//!
//! A pin claim is two transactions. The proof-of-burn destroys storage
//! tokens as collateral for the requested size; the claim transaction then
//! references that burn together with the content id and filename so that
//! storage providers pick the object up.
//!
//! There is no way to undo a burn. When the second phase fails the record is
//! moved to [`BurnOrphaned`](crate::ledger::PaymentState::BurnOrphaned) and
//! the caller receives [`PinClaimError::OrphanedBurn`]; only
//! [`PinClaimIssuer::resume_orphaned`] may finish such a record.
//!
//! The record is moved to
//! [`BurnUnconfirmed`](crate::ledger::PaymentState::BurnUnconfirmed) before
//! the burn is broadcast. A broadcast that never answers leaves it there, so
//! no later attempt can burn a second time until an operator reconciles it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::boundary::bounded;
use crate::cost::CostCalculator;
use crate::error::{PinClaimError, TxStage};
use crate::ledger::{PaymentLedger, PaymentRecord};
use crate::wallet::Wallet;

/// Transaction ids of a completed pin claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinClaim {
    /// Proof-of-burn transaction id.
    pub proof_of_burn_txid: String,
    /// Claim transaction id.
    pub claim_txid: String,
}

/// Builds and broadcasts the burn and claim transactions.
pub struct PinClaimIssuer {
    wallet: Arc<dyn Wallet>,
    ledger: Arc<dyn PaymentLedger>,
    cost: Arc<CostCalculator>,
    timeout: Duration,
}

impl std::fmt::Debug for PinClaimIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinClaimIssuer")
            .field("cost", &self.cost)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PinClaimIssuer {
    /// Creates an issuer.
    #[must_use]
    pub fn new(
        wallet: Arc<dyn Wallet>,
        ledger: Arc<dyn PaymentLedger>,
        cost: Arc<CostCalculator>,
        timeout: Duration,
    ) -> Self {
        Self {
            wallet,
            ledger,
            cost,
            timeout,
        }
    }

    /// Burns collateral for `record`, announces the claim, and marks the
    /// record claimed.
    ///
    /// # Errors
    ///
    /// Failures before the burn is broadcast, and a burn the network
    /// rejected, leave the record `Pending` and are safe to retry. A burn
    /// broadcast that never answers returns [`PinClaimError::BurnUnconfirmed`]
    /// and leaves the record `BurnUnconfirmed`. Any failure after a
    /// successful burn returns [`PinClaimError::OrphanedBurn`].
    pub async fn issue_claim(
        &self,
        record: &PaymentRecord,
        content_id: &str,
        filename: &str,
    ) -> Result<PinClaim, PinClaimError> {
        let address = record.address.as_str();
        let proof_of_burn_txid = self.burn(record, content_id).await?;
        tracing::info!(address, cid = %content_id, %proof_of_burn_txid, "broadcast proof-of-burn");

        let claim_txid = match self.announce(address, &proof_of_burn_txid, content_id, filename).await {
            Ok(txid) => txid,
            Err(cause) => {
                return Err(self
                    .orphan(address, content_id, proof_of_burn_txid, cause)
                    .await);
            }
        };

        let recorded = bounded(
            self.timeout,
            "mark claimed",
            address,
            self.ledger
                .mark_claimed(address, &proof_of_burn_txid, &claim_txid),
        )
        .await
        .and_then(|result| result.map_err(PinClaimError::from));
        match recorded {
            Ok(_) => {
                tracing::info!(address, cid = %content_id, %proof_of_burn_txid, %claim_txid, "pin claim recorded");
                Ok(PinClaim {
                    proof_of_burn_txid,
                    claim_txid,
                })
            }
            Err(source) => {
                tracing::error!(
                    address,
                    cid = %content_id,
                    %proof_of_burn_txid,
                    %claim_txid,
                    error = %source,
                    "claim broadcast but ledger update failed"
                );
                Err(PinClaimError::OrphanedBurn {
                    address: address.to_owned(),
                    content_id: Some(content_id.to_owned()),
                    proof_of_burn_txid,
                    cause: format!("claim {claim_txid} broadcast but not recorded: {source}"),
                })
            }
        }
    }

    /// Finishes a record stuck in `BurnOrphaned` by broadcasting the claim
    /// for its recorded burn.
    ///
    /// # Errors
    ///
    /// Returns [`PinClaimError::NotOrphaned`] or [`PinClaimError::AlreadyClaimed`]
    /// if the record has no orphaned burn, and collaborator errors from the
    /// claim broadcast. The record stays `BurnOrphaned` on failure.
    pub async fn resume_orphaned(
        &self,
        record: &PaymentRecord,
        content_id: &str,
        filename: &str,
    ) -> Result<PinClaim, PinClaimError> {
        let address = record.address.as_str();
        if record.is_claimed() {
            return Err(PinClaimError::AlreadyClaimed {
                address: address.to_owned(),
            });
        }
        let Some(proof_of_burn_txid) = record.proof_of_burn_txid() else {
            return Err(PinClaimError::NotOrphaned {
                address: address.to_owned(),
            });
        };

        let claim_txid = self
            .announce(address, proof_of_burn_txid, content_id, filename)
            .await?;
        bounded(
            self.timeout,
            "complete orphaned",
            address,
            self.ledger.complete_orphaned(address, &claim_txid),
        )
        .await??;
        tracing::info!(address, cid = %content_id, %proof_of_burn_txid, %claim_txid, "orphaned burn reconciled");
        Ok(PinClaim {
            proof_of_burn_txid: proof_of_burn_txid.to_owned(),
            claim_txid,
        })
    }

    async fn burn(&self, record: &PaymentRecord, content_id: &str) -> Result<String, PinClaimError> {
        let address = record.address.as_str();
        let tokens = self.cost.token_cost(record.requested_size_mb).await?;
        let tx = bounded(
            self.timeout,
            "build proof-of-burn",
            address,
            self.wallet.build_proof_of_burn(tokens),
        )
        .await?
        .map_err(|source| PinClaimError::Wallet {
            operation: "build proof-of-burn",
            source,
        })?;

        bounded(
            self.timeout,
            "mark burn attempted",
            address,
            self.ledger.mark_burn_attempted(address),
        )
        .await??;

        match bounded(
            self.timeout,
            "broadcast proof-of-burn",
            address,
            self.wallet.broadcast(&tx),
        )
        .await
        {
            Ok(Ok(proof_of_burn_txid)) => Ok(proof_of_burn_txid),
            Ok(Err(source)) => {
                let rejected = PinClaimError::BroadcastFailed {
                    address: address.to_owned(),
                    stage: TxStage::ProofOfBurn,
                    source,
                };
                match bounded(
                    self.timeout,
                    "reset burn attempt",
                    address,
                    self.ledger.reset_burn_attempt(address),
                )
                .await
                .and_then(|result| result.map_err(PinClaimError::from))
                {
                    Ok(()) => Err(rejected),
                    Err(err) => {
                        tracing::error!(address, error = %err, "burn rejected but attempt not cleared");
                        Err(PinClaimError::BurnUnconfirmed {
                            address: address.to_owned(),
                            content_id: Some(content_id.to_owned()),
                            cause: format!("{rejected}; clearing the attempt failed: {err}"),
                        })
                    }
                }
            }
            Err(lost) => {
                tracing::error!(
                    address,
                    cid = %content_id,
                    error = %lost,
                    "proof-of-burn broadcast gave no answer; collateral may be burned"
                );
                Err(PinClaimError::BurnUnconfirmed {
                    address: address.to_owned(),
                    content_id: Some(content_id.to_owned()),
                    cause: lost.to_string(),
                })
            }
        }
    }

    async fn announce(
        &self,
        address: &str,
        proof_of_burn_txid: &str,
        content_id: &str,
        filename: &str,
    ) -> Result<String, PinClaimError> {
        let tx = bounded(
            self.timeout,
            "build claim",
            address,
            self.wallet
                .build_claim(proof_of_burn_txid, content_id, filename),
        )
        .await?
        .map_err(|source| PinClaimError::Wallet {
            operation: "build claim",
            source,
        })?;
        bounded(self.timeout, "broadcast claim", address, self.wallet.broadcast(&tx))
            .await?
            .map_err(|source| PinClaimError::BroadcastFailed {
                address: address.to_owned(),
                stage: TxStage::Claim,
                source,
            })
    }

    async fn orphan(
        &self,
        address: &str,
        content_id: &str,
        proof_of_burn_txid: String,
        cause: PinClaimError,
    ) -> PinClaimError {
        tracing::error!(
            address,
            cid = %content_id,
            %proof_of_burn_txid,
            error = %cause,
            "claim failed after proof-of-burn; collateral is orphaned"
        );
        let recorded = bounded(
            self.timeout,
            "mark burn orphaned",
            address,
            self.ledger.mark_burn_orphaned(address, &proof_of_burn_txid),
        )
        .await
        .and_then(|result| result.map_err(PinClaimError::from));
        if let Err(err) = recorded {
            tracing::error!(
                address,
                %proof_of_burn_txid,
                error = %err,
                "could not record orphaned burn"
            );
        }
        PinClaimError::OrphanedBurn {
            address: address.to_owned(),
            content_id: Some(content_id.to_owned()),
            proof_of_burn_txid,
            cause: cause.to_string(),
        }
    }
}
