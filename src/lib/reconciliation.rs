//! Pending unwrap requests from the event indexer, joined with their
//! public decryptions.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::unwrap::{DecryptionResult, PendingUnwrap, UnwrapRequest};
use crate::encryption::{FheAdapter, PublicDecryption};
use crate::errors::{CryptoError, OperationError};
use crate::ports::fhe::FheEngine;
use crate::ports::indexer::{IndexerError, IndexerPort, UnwrapRequestFilter};
use crate::ports::wallet::WalletPort;
use crate::requirements::{evaluate, DecryptionRequirements};

enum Claim {
    Cached(DecryptionResult),
    Owned,
}

/// Read-through view of a wallet's pending unwraps for one wrapper.
///
/// Nothing from the indexer is persisted; every `fetch` re-queries. Public
/// decryptions are memoized by `burnt_amount` for the lifetime of the
/// reconciler. A `Success` is never recomputed; an `Error` is dropped on the
/// next fetch so the request can be evaluated again.
///
/// Decryptions are refused with `RequirementsNotMet` while the wallet, the
/// engine or the signer is not ready; a refusal is not cached.
pub struct UnwrapReconciler<I: IndexerPort, E: FheEngine, W: WalletPort> {
    indexer: Arc<I>,
    fhe: FheAdapter<E>,
    wallet: Arc<W>,
    decryptions: Mutex<HashMap<B256, DecryptionResult>>,
}

impl<I: IndexerPort, E: FheEngine, W: WalletPort> UnwrapReconciler<I, E, W> {
    pub fn new(indexer: Arc<I>, fhe: FheAdapter<E>, wallet: Arc<W>) -> Self {
        Self {
            indexer,
            fhe,
            wallet,
            decryptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn requirements(&self) -> DecryptionRequirements {
        evaluate(
            self.wallet.address().is_some(),
            self.fhe.is_ready(),
            self.wallet.is_signer_ready(),
        )
    }

    fn require_decryption(&self) -> Result<(), OperationError> {
        let requirements = self.requirements();
        if requirements.can_decrypt {
            Ok(())
        } else {
            debug!(missing = ?requirements.missing_message, "public decryption refused");
            Err(OperationError::RequirementsNotMet(
                requirements.missing_message.unwrap_or_default(),
            ))
        }
    }

    /// Unfinalized requests of `wallet` on `wrapper`, newest first.
    pub async fn fetch(
        &self,
        wallet: Address,
        wrapper: Address,
    ) -> Result<Vec<UnwrapRequest>, IndexerError> {
        let filter = UnwrapRequestFilter {
            recipient: wallet,
            token_address: wrapper,
            is_finalized: false,
        };
        let mut requests = self.indexer.unwrap_requests(&filter).await?;
        requests.sort_by(|a, b| b.request_timestamp.cmp(&a.request_timestamp));

        self.decryptions
            .lock()
            .await
            .retain(|_, result| !matches!(result, DecryptionResult::Error { .. }));

        debug!(%wallet, %wrapper, count = requests.len(), "fetched pending unwraps");
        Ok(requests)
    }

    /// Like [`fetch`](Self::fetch), but an unreachable indexer yields an empty list.
    pub async fn fetch_or_empty(&self, wallet: Address, wrapper: Address) -> Vec<UnwrapRequest> {
        match self.fetch(wallet, wrapper).await {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "indexer query failed, showing no pending unwraps");
                Vec::new()
            }
        }
    }

    /// Cached decryption state for a burn, if it was ever evaluated.
    pub async fn cached(&self, burnt_amount: &B256) -> Option<DecryptionResult> {
        self.decryptions.lock().await.get(burnt_amount).cloned()
    }

    async fn claim(&self, burnt_amount: B256, retry_errors: bool) -> Claim {
        let mut cache = self.decryptions.lock().await;
        match cache.get(&burnt_amount) {
            Some(DecryptionResult::Error { .. }) if retry_errors => {}
            Some(existing) => return Claim::Cached(existing.clone()),
            None => {}
        }
        cache.insert(burnt_amount, DecryptionResult::Loading);
        Claim::Owned
    }

    async fn run(&self, burnt_amount: B256) -> Result<PublicDecryption, CryptoError> {
        let outcome = self.fhe.decrypt_publicly(burnt_amount).await;
        let result = match &outcome {
            Ok(decryption) => DecryptionResult::Success {
                cleartext_amount: decryption.cleartext_amount,
                proof: decryption.proof.clone(),
            },
            Err(e) => {
                warn!(%burnt_amount, error = %e, "public decryption failed");
                DecryptionResult::Error {
                    message: e.to_string(),
                }
            }
        };
        self.decryptions.lock().await.insert(burnt_amount, result);
        outcome
    }

    /// Lazily decrypt a request's burned amount for display.
    ///
    /// Returns `Loading` if another caller is already decrypting it.
    pub async fn decrypt(&self, request: &UnwrapRequest) -> Result<DecryptionResult, OperationError> {
        self.require_decryption()?;
        let result = match self.claim(request.burnt_amount, false).await {
            Claim::Cached(result) => result,
            Claim::Owned => match self.run(request.burnt_amount).await {
                Ok(d) => DecryptionResult::Success {
                    cleartext_amount: d.cleartext_amount,
                    proof: d.proof,
                },
                Err(e) => DecryptionResult::Error {
                    message: e.to_string(),
                },
            },
        };
        Ok(result)
    }

    /// Cleartext and proof needed to finalize `request`.
    ///
    /// Reuses a cached success; a cached failure is retried.
    pub async fn public_decryption(
        &self,
        request: &UnwrapRequest,
    ) -> Result<PublicDecryption, OperationError> {
        self.require_decryption()?;
        match self.claim(request.burnt_amount, true).await {
            Claim::Cached(DecryptionResult::Success {
                cleartext_amount,
                proof,
            }) => Ok(PublicDecryption {
                cleartext_amount,
                proof,
            }),
            Claim::Cached(DecryptionResult::Loading) => Err(OperationError::Busy(
                "public decryption already in progress".into(),
            )),
            Claim::Cached(DecryptionResult::Error { message }) => {
                Err(CryptoError::Decryption(message).into())
            }
            Claim::Owned => Ok(self.run(request.burnt_amount).await?),
        }
    }

    /// Pair each request with the best known cleartext amount.
    pub async fn views(&self, requests: &[UnwrapRequest]) -> Vec<PendingUnwrap> {
        let cache = self.decryptions.lock().await;
        requests
            .iter()
            .map(|request| {
                let decrypted = match cache.get(&request.burnt_amount) {
                    Some(DecryptionResult::Success {
                        cleartext_amount, ..
                    }) => Some(*cleartext_amount),
                    _ => None,
                };
                PendingUnwrap {
                    request: request.clone(),
                    amount: request.cleartext_amount.or(decrypted),
                }
            })
            .collect()
    }
}
