use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{InFlight, OperationContext};
use crate::config::PollPolicy;
use crate::domain::unwrap::UnwrapRequest;
use crate::errors::{OperationError, StepError};
use crate::events::OperationEvent;
use crate::ports::contracts::ContractPort;
use crate::ports::fhe::FheEngine;
use crate::ports::indexer::IndexerPort;
use crate::ports::wallet::WalletPort;
use crate::ports::TxReceipt;
use crate::reconciliation::UnwrapReconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnwrapStep {
    /// Encrypt the amount and burn it from the confidential balance.
    Burn,
    /// Publish the public decryption and release the ERC20.
    Finalize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnOutcome {
    pub receipt: TxReceipt,
    /// The request as the indexer reports it, if it caught up within the
    /// allowed poll attempts.
    pub request: Option<UnwrapRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub receipt: TxReceipt,
    pub cleartext_amount: u64,
}

#[derive(Default)]
struct UnwrapState {
    wrapper: Option<Address>,
    error: Option<StepError<UnwrapStep>>,
}

/// Two-phase unwrap: burn now, finalize once the burned amount is public.
pub struct UnwrapOrchestrator<C: ContractPort, E: FheEngine, W: WalletPort, I: IndexerPort> {
    ctx: OperationContext<C, E, W>,
    reconciler: Arc<UnwrapReconciler<I, E, W>>,
    policy: PollPolicy,
    state: Mutex<UnwrapState>,
    burning: InFlight<()>,
    /// `burnt_amount` of the request whose finalize is in flight.
    pending_tx: InFlight<B256>,
    /// Bumped on retarget or cancel; a poll loop stops once it differs.
    generation: AtomicU64,
}

impl<C, E, W, I> UnwrapOrchestrator<C, E, W, I>
where
    C: ContractPort,
    E: FheEngine,
    W: WalletPort,
    I: IndexerPort,
{
    pub fn new(
        ctx: OperationContext<C, E, W>,
        reconciler: Arc<UnwrapReconciler<I, E, W>>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            ctx,
            reconciler,
            policy,
            state: Mutex::new(UnwrapState::default()),
            burning: InFlight::new(),
            pending_tx: InFlight::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Target the wrapper of the selected token pair (`None` if it has none).
    pub async fn set_wrapper(&self, wrapper: Option<Address>) {
        let mut state = self.state.lock().await;
        if state.wrapper != wrapper {
            self.generation.fetch_add(1, Ordering::SeqCst);
            state.wrapper = wrapper;
            state.error = None;
        }
    }

    /// Stop any poll loop still running for the current target.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn pending_finalize(&self) -> Option<B256> {
        self.pending_tx.current()
    }

    pub async fn error(&self) -> Option<StepError<UnwrapStep>> {
        self.state
            .lock()
            .await
            .error
            .clone()
            .filter(StepError::is_visible)
    }

    async fn record(&self, step: Option<UnwrapStep>, error: &OperationError) {
        warn!(?step, error = %error, "unwrap step failed");
        self.state.lock().await.error = Some(StepError::new(step, error.clone()));
    }

    /// Phase one. Burns `amount` from the decrypted confidential balance,
    /// then gives the indexer a bounded number of chances to report it.
    pub async fn burn(&self, amount: u64) -> Result<BurnOutcome, OperationError> {
        let owner = match self.ctx.require_decryption() {
            Ok(owner) => owner,
            Err(error) => {
                self.record(None, &error).await;
                return Err(error);
            }
        };

        let target = self.state.lock().await.wrapper;
        let Some(wrapper) = target else {
            let error = OperationError::Validation("no confidential wrapper for this token".into());
            self.record(None, &error).await;
            return Err(error);
        };
        let Ok(burning) = self.burning.claim(()) else {
            return Err(OperationError::Busy("an unwrap is already in progress".into()));
        };
        self.state.lock().await.error = None;
        let generation = self.generation.load(Ordering::SeqCst);

        let result = self.submit_burn(wrapper, owner, amount).await;
        drop(burning);

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(error) => {
                self.record(Some(UnwrapStep::Burn), &error).await;
                return Err(error);
            }
        };

        let request = self
            .poll_for_request(owner, wrapper, receipt.tx_hash, generation)
            .await;
        self.ctx.events.emit(OperationEvent::RefreshRequested);

        Ok(BurnOutcome { receipt, request })
    }

    async fn submit_burn(
        &self,
        wrapper: Address,
        owner: Address,
        amount: u64,
    ) -> Result<TxReceipt, OperationError> {
        let balance = self
            .ctx
            .balances
            .get_state(wrapper)
            .await
            .authoritative_value()
            .ok_or_else(|| {
                OperationError::Validation("decrypt your balance before unwrapping".into())
            })?;
        if amount == 0 {
            return Err(OperationError::Validation("amount must be greater than zero".into()));
        }
        if amount > balance {
            return Err(OperationError::Validation(
                "amount exceeds confidential balance".into(),
            ));
        }

        let encrypted = self.ctx.fhe.encrypt_amount(wrapper, owner, amount).await?;
        info!(%wrapper, "burning confidential amount");
        let receipt = self
            .ctx
            .contracts
            .unwrap(wrapper, owner, owner, encrypted.handle, encrypted.proof)
            .await?;

        self.ctx.balances.clear_balance(wrapper).await;
        self.ctx.events.emit(OperationEvent::UnwrapRequested {
            wrapper,
            tx_hash: receipt.tx_hash,
        });
        Ok(receipt)
    }

    /// Look for the request created by `tx_hash`. Gives up quietly: the burn
    /// already succeeded, the request will surface on a later fetch.
    async fn poll_for_request(
        &self,
        owner: Address,
        wrapper: Address,
        tx_hash: B256,
        generation: u64,
    ) -> Option<UnwrapRequest> {
        pause(self.policy.initial_delay).await;

        let attempts = self.policy.attempts();
        for attempt in 1..=attempts {
            if self.generation.load(Ordering::SeqCst) != generation {
                info!(%wrapper, "unwrap target changed, polling stopped");
                return None;
            }

            match self.reconciler.fetch(owner, wrapper).await {
                Ok(requests) => {
                    if let Some(request) = requests
                        .into_iter()
                        .find(|r| r.request_transaction_hash == tx_hash)
                    {
                        info!(%wrapper, attempt, "indexer reported unwrap request");
                        return Some(request);
                    }
                }
                Err(e) => warn!(attempt, error = %e, "indexer poll failed"),
            }

            if attempt < attempts {
                pause(self.policy.interval).await;
            }
        }

        warn!(%tx_hash, attempts, "unwrap not indexed yet, check back later");
        None
    }

    /// Phase two for one pending request. Only one finalize runs at a time.
    pub async fn finalize(&self, request: &UnwrapRequest) -> Result<FinalizeOutcome, OperationError> {
        if let Err(error) = self.ctx.require_decryption() {
            self.record(None, &error).await;
            return Err(error);
        }
        let pending = match self.pending_tx.claim(request.burnt_amount) {
            Ok(pending) => pending,
            Err(held) => {
                return Err(OperationError::Busy(format!("finalize of {held} still pending")));
            }
        };
        self.state.lock().await.error = None;

        let result = self.submit_finalize(request).await;
        drop(pending);
        match &result {
            Ok(outcome) => {
                info!(
                    burnt_amount = %request.burnt_amount,
                    tx = %outcome.receipt.tx_hash,
                    "unwrap finalized"
                );
                self.ctx.events.emit(OperationEvent::UnwrapFinalized {
                    wrapper: request.token_address,
                    burnt_amount: request.burnt_amount,
                });
            }
            Err(error) => self.record(Some(UnwrapStep::Finalize), error).await,
        }
        self.ctx.events.emit(OperationEvent::RefreshRequested);
        result
    }

    async fn submit_finalize(&self, request: &UnwrapRequest) -> Result<FinalizeOutcome, OperationError> {
        if request.is_finalized {
            return Err(OperationError::Validation("unwrap already finalized".into()));
        }

        let decryption = self.reconciler.public_decryption(request).await?;
        let receipt = self
            .ctx
            .contracts
            .finalize_unwrap(
                request.token_address,
                request.burnt_amount,
                decryption.cleartext_amount,
                decryption.proof,
            )
            .await?;

        Ok(FinalizeOutcome {
            receipt,
            cleartext_amount: decryption.cleartext_amount,
        })
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_contracts::MockContracts;
    use crate::adapters::mock_fhe::MockFheEngine;
    use crate::adapters::mock_indexer::{pending_request, MockIndexer};
    use crate::adapters::mock_wallet::MockWallet;
    use crate::domain::unwrap::DecryptionResult;
    use crate::orchestrator::fixtures::{harness, Harness, USER};

    const WRAPPER: Address = Address::repeat_byte(0xC1);

    type MockUnwrap = UnwrapOrchestrator<MockContracts, MockFheEngine, MockWallet, MockIndexer>;

    struct Setup {
        h: Harness,
        indexer: Arc<MockIndexer>,
        reconciler: Arc<UnwrapReconciler<MockIndexer, MockFheEngine, MockWallet>>,
        unwrap: MockUnwrap,
    }

    async fn setup() -> Setup {
        let h = harness();
        let indexer = Arc::new(MockIndexer::new());
        let reconciler = Arc::new(UnwrapReconciler::new(
            Arc::clone(&indexer),
            h.ctx.fhe.clone(),
            Arc::clone(&h.wallet),
        ));
        let unwrap = UnwrapOrchestrator::new(
            h.ctx.clone(),
            Arc::clone(&reconciler),
            PollPolicy::immediate(2),
        );
        unwrap.set_wrapper(Some(WRAPPER)).await;
        Setup {
            h,
            indexer,
            reconciler,
            unwrap,
        }
    }

    #[tokio::test]
    async fn burn_requires_decrypted_balance() {
        let s = setup().await;

        let err = s.unwrap.burn(10).await.unwrap_err();

        assert!(matches!(err, OperationError::Validation(_)));
        assert_eq!(s.h.engine.encrypt_count(), 0);
        assert_eq!(s.h.chain.call_count("unwrap").await, 0);
    }

    #[tokio::test]
    async fn burn_blocked_by_requirements() {
        let s = setup().await;
        s.h.decrypted_balance(WRAPPER, 100).await;
        s.h.wallet.set_signer_ready(false);

        let err = s.unwrap.burn(10).await.unwrap_err();

        assert_eq!(err, OperationError::RequirementsNotMet("Signer".into()));
        assert_eq!(s.unwrap.error().await.unwrap().error, err);
    }

    #[tokio::test]
    async fn burn_rejects_amount_above_balance() {
        let s = setup().await;
        s.h.decrypted_balance(WRAPPER, 100).await;

        assert!(matches!(
            s.unwrap.burn(101).await,
            Err(OperationError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn burn_picks_up_request_on_second_poll() {
        let s = setup().await;
        s.h.decrypted_balance(WRAPPER, 500).await;
        let tx_hash = s.h.chain.peek_next_tx_hash().await;
        let burnt = B256::repeat_byte(0xB1);
        s.indexer
            .stage(2, pending_request(USER, WRAPPER, burnt, tx_hash, 1_700_000_000))
            .await;

        let outcome = s.unwrap.burn(500).await.unwrap();

        assert_eq!(outcome.receipt.tx_hash, tx_hash);
        let request = outcome.request.expect("request found");
        assert_eq!(request.burnt_amount, burnt);
        assert!(!request.is_finalized);
        assert_eq!(s.indexer.query_count(), 2);
        assert_eq!(s.h.ctx.balances.get_state(WRAPPER).await.decrypted_value, None);
    }

    #[tokio::test]
    async fn polling_gives_up_without_error() {
        let s = setup().await;
        s.h.decrypted_balance(WRAPPER, 500).await;

        let outcome = s.unwrap.burn(5).await.unwrap();

        assert!(outcome.request.is_none());
        assert_eq!(s.indexer.query_count(), 3);
        assert!(s.unwrap.error().await.is_none());
    }

    #[tokio::test]
    async fn unavailable_indexer_does_not_fail_burn() {
        let s = setup().await;
        s.h.decrypted_balance(WRAPPER, 500).await;
        s.indexer.set_unavailable(true);

        let outcome = s.unwrap.burn(5).await.unwrap();
        assert!(outcome.request.is_none());
        assert_eq!(s.h.chain.call_count("unwrap").await, 1);
    }

    #[tokio::test]
    async fn retarget_during_burn_stops_polling() {
        let s = setup().await;
        s.h.decrypted_balance(WRAPPER, 500).await;

        // The second branch runs while the burn waits for confirmation.
        let (outcome, ()) = tokio::join!(
            s.unwrap.burn(5),
            s.unwrap.set_wrapper(Some(Address::repeat_byte(0xC2))),
        );

        assert!(outcome.unwrap().request.is_none());
        assert_eq!(s.indexer.query_count(), 0);
    }

    #[tokio::test]
    async fn finalize_uses_cached_decryption() {
        let s = setup().await;
        let burnt = s.h.engine.seed_value(250);
        let request = pending_request(USER, WRAPPER, burnt, B256::repeat_byte(1), 10);
        let shown = s.reconciler.decrypt(&request).await.unwrap();
        assert!(shown.is_success());

        let outcome = s.unwrap.finalize(&request).await.unwrap();

        assert_eq!(outcome.cleartext_amount, 250);
        assert_eq!(s.h.engine.public_decrypt_count(), 1);
        let calls = s.h.chain.finalize_calls().await;
        let DecryptionResult::Success { proof, .. } = shown else {
            unreachable!()
        };
        assert_eq!(calls[0].cleartext_amount, 250);
        assert_eq!(calls[0].proof, proof);
        assert_eq!(s.unwrap.pending_finalize().await, None);
    }

    #[tokio::test]
    async fn second_finalize_rejected_while_first_pending() {
        let s = setup().await;
        let first = pending_request(USER, WRAPPER, s.h.engine.seed_value(1), B256::repeat_byte(1), 10);
        let second = pending_request(USER, WRAPPER, s.h.engine.seed_value(2), B256::repeat_byte(2), 20);

        let (a, b) = tokio::join!(s.unwrap.finalize(&first), async {
            let pending = s.unwrap.pending_finalize().await;
            (pending, s.unwrap.finalize(&second).await)
        });

        assert!(a.is_ok());
        let (pending, rejected) = b;
        assert_eq!(pending, Some(first.burnt_amount));
        assert!(matches!(rejected, Err(OperationError::Busy(_))));
        assert_eq!(s.h.chain.finalize_calls().await.len(), 1);

        // Released once the first settles.
        assert!(s.unwrap.finalize(&second).await.is_ok());
    }

    #[tokio::test]
    async fn failed_finalize_releases_marker_and_requests_refresh() {
        let s = setup().await;
        let request = pending_request(USER, WRAPPER, s.h.engine.seed_value(3), B256::repeat_byte(1), 10);
        s.h.chain.fail_next("finalize_unwrap", "InvalidKMSSignatures()").await;
        let mut events = s.h.ctx.events.subscribe();

        let err = s.unwrap.finalize(&request).await.unwrap_err();

        assert!(matches!(err, OperationError::Contract(_)));
        assert_eq!(s.unwrap.pending_finalize().await, None);
        assert_eq!(events.recv().await.unwrap(), OperationEvent::RefreshRequested);
        assert_eq!(s.unwrap.error().await.unwrap().step, Some(UnwrapStep::Finalize));
    }

    #[tokio::test]
    async fn burn_without_wrapper_is_recorded() {
        let s = setup().await;
        s.h.decrypted_balance(WRAPPER, 100).await;
        s.unwrap.set_wrapper(None).await;

        let err = s.unwrap.burn(10).await.unwrap_err();

        assert!(matches!(err, OperationError::Validation(_)));
        assert_eq!(s.unwrap.error().await.unwrap().error, err);
        assert_eq!(s.h.engine.encrypt_count(), 0);
    }

    #[tokio::test]
    async fn finalize_blocked_by_requirements() {
        let s = setup().await;
        let request = pending_request(USER, WRAPPER, s.h.engine.seed_value(7), B256::repeat_byte(1), 10);
        s.h.wallet.set_signer_ready(false);

        let err = s.unwrap.finalize(&request).await.unwrap_err();

        assert_eq!(err, OperationError::RequirementsNotMet("Signer".into()));
        assert_eq!(s.unwrap.error().await.unwrap().error, err);
        assert_eq!(s.h.engine.public_decrypt_count(), 0);
        assert!(s.h.chain.finalize_calls().await.is_empty());
        assert_eq!(s.unwrap.pending_finalize().await, None);
    }

    #[tokio::test]
    async fn abandoned_finalize_releases_marker() {
        let s = setup().await;
        let first = pending_request(USER, WRAPPER, s.h.engine.seed_value(1), B256::repeat_byte(1), 10);
        let second = pending_request(USER, WRAPPER, s.h.engine.seed_value(2), B256::repeat_byte(2), 20);

        tokio::select! {
            biased;
            _ = s.unwrap.finalize(&first) => panic!("finalize should still be in flight"),
            _ = std::future::ready(()) => {}
        }

        assert_eq!(s.unwrap.pending_finalize().await, None);
        assert_eq!(s.unwrap.finalize(&second).await.unwrap().cleartext_amount, 2);
    }

    #[tokio::test]
    async fn abandoned_burn_allows_retry() {
        let s = setup().await;
        s.h.decrypted_balance(WRAPPER, 500).await;

        tokio::select! {
            biased;
            _ = s.unwrap.burn(5) => panic!("burn should still be in flight"),
            _ = std::future::ready(()) => {}
        }

        let outcome = s.unwrap.burn(5).await.unwrap();
        assert_eq!(s.h.chain.call_count("unwrap").await, 1);
        assert!(outcome.receipt.success);
    }
}

