use std::collections::BTreeSet;

use alloy::primitives::{Address, U256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{InFlight, OperationContext};
use crate::domain::token::TokenPair;
use crate::errors::{ContractFailure, ContractFailureKind, OperationError, StepError};
use crate::events::OperationEvent;
use crate::ports::contracts::{ContractError, ContractPort};
use crate::ports::fhe::FheEngine;
use crate::ports::wallet::WalletPort;
use crate::ports::TxReceipt;

/// Steps of a wrap, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WrapStep {
    /// Deploy the confidential wrapper through the factory.
    Create,
    Approve,
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Claimed by a caller, reading allowance before the first transaction.
    Preparing,
    Running(WrapStep),
    /// The wrapper was created; the sequence resumes once the refreshed
    /// token pair carries its address.
    AwaitingWrapper { amount: U256 },
}

struct WrapState {
    pair: Option<TokenPair>,
    phase: Phase,
    completed: BTreeSet<WrapStep>,
    error: Option<StepError<WrapStep>>,
    /// Bumped whenever the target pair changes; in-flight sequences compare
    /// against it before touching state.
    generation: u64,
}

/// Snapshot of a wrap sequence for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapProgress {
    pub current_step: Option<WrapStep>,
    pub completed_steps: BTreeSet<WrapStep>,
    pub awaiting_wrapper: bool,
    /// Only while still visible; transient errors expire.
    pub error: Option<StepError<WrapStep>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapOutcome {
    /// Wrapper deployed; call [`WrapOrchestrator::on_pair_updated`] with the
    /// refreshed pair to continue.
    AwaitingWrapper { erc20: Address, receipt: TxReceipt },
    Wrapped {
        wrapper: Address,
        receipt: TxReceipt,
        completed_steps: BTreeSet<WrapStep>,
    },
    /// The target pair changed while the sequence was running.
    Cancelled,
}

enum Halt {
    Cancelled,
    Failed(Option<WrapStep>, OperationError),
}

fn failed(step: WrapStep) -> impl FnOnce(ContractError) -> Halt {
    move |err| Halt::Failed(Some(step), err.into())
}

/// Create → approve → wrap, skipping the steps that are not needed.
pub struct WrapOrchestrator<C: ContractPort, E: FheEngine, W: WalletPort> {
    ctx: OperationContext<C, E, W>,
    state: Mutex<WrapState>,
    /// Held by the caller driving a sequence; `Preparing`/`Running` phases
    /// are stale once it is free.
    running: InFlight<()>,
}

impl<C: ContractPort, E: FheEngine, W: WalletPort> WrapOrchestrator<C, E, W> {
    pub fn new(ctx: OperationContext<C, E, W>) -> Self {
        Self {
            ctx,
            state: Mutex::new(WrapState {
                pair: None,
                phase: Phase::Idle,
                completed: BTreeSet::new(),
                error: None,
                generation: 0,
            }),
            running: InFlight::new(),
        }
    }

    /// Target a token pair. Switching to a different ERC20 resets progress
    /// and detaches any sequence still running for the previous one.
    pub async fn set_pair(&self, pair: TokenPair) {
        let mut state = self.state.lock().await;
        retarget(&mut state, pair);
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.pair = None;
        state.phase = Phase::Idle;
        state.completed.clear();
        state.error = None;
    }

    pub async fn progress(&self) -> WrapProgress {
        let state = self.state.lock().await;
        WrapProgress {
            current_step: match state.phase {
                Phase::Running(step) if self.running.is_held() => Some(step),
                _ => None,
            },
            completed_steps: state.completed.clone(),
            awaiting_wrapper: matches!(state.phase, Phase::AwaitingWrapper { .. }),
            error: state.error.clone().filter(StepError::is_visible),
        }
    }

    /// Start wrapping `amount` (ERC20 base units) of the selected token.
    pub async fn start(&self, amount: U256) -> Result<WrapOutcome, OperationError> {
        let Ok(_running) = self.running.claim(()) else {
            return Err(OperationError::Busy("a wrap is already in progress".into()));
        };
        let (pair, generation) = {
            let mut state = self.state.lock().await;
            if matches!(state.phase, Phase::AwaitingWrapper { .. }) {
                return Err(OperationError::Busy(
                    "waiting for the new wrapper to be indexed".into(),
                ));
            }
            if let Err(error) = self.validate(state.pair.as_ref(), amount) {
                state.error = Some(StepError::new(None, error.clone()));
                return Err(error);
            }
            let Some(pair) = state.pair.clone() else {
                return Err(OperationError::Validation("no token selected".into()));
            };
            state.error = None;
            state.phase = Phase::Preparing;
            (pair, state.generation)
        };

        let result = match self.ctx.sender() {
            Err(error) => Err(Halt::Failed(None, error)),
            Ok(owner) => match pair.wrapped_address {
                None => self.create(pair.erc20_address, amount, generation).await,
                Some(wrapper) => {
                    self.approve_and_wrap(pair.erc20_address, wrapper, owner, amount, generation)
                        .await
                }
            },
        };
        self.settle(generation, result).await
    }

    fn validate(&self, pair: Option<&TokenPair>, amount: U256) -> Result<(), OperationError> {
        let pair = pair.ok_or_else(|| OperationError::Validation("no token selected".into()))?;
        if amount.is_zero() {
            return Err(OperationError::Validation("amount must be greater than zero".into()));
        }
        if amount > pair.erc20_balance {
            return Err(OperationError::Validation(format!(
                "amount exceeds {} balance",
                pair.erc20_symbol
            )));
        }
        Ok(())
    }

    /// Feed a refreshed token pair. Resumes a sequence waiting on wrapper
    /// creation, at most once per creation; returns `None` when nothing ran.
    pub async fn on_pair_updated(
        &self,
        pair: TokenPair,
    ) -> Option<Result<WrapOutcome, OperationError>> {
        let _running = self.running.claim(()).ok()?;
        let (erc20, wrapper, amount, generation) = {
            let mut state = self.state.lock().await;
            retarget(&mut state, pair.clone());

            let Phase::AwaitingWrapper { amount } = state.phase else {
                return None;
            };
            let wrapper = pair.wrapped_address?;
            // Consuming the waiting phase under the lock makes a repeated
            // signal a no-op.
            state.phase = Phase::Preparing;
            // The balance may have moved while the wrapper was being created.
            if let Err(error) = self.validate(Some(&pair), amount) {
                state.phase = Phase::Idle;
                state.error = Some(StepError::new(None, error.clone()));
                return Some(Err(error));
            }
            (pair.erc20_address, wrapper, amount, state.generation)
        };

        info!(%erc20, %wrapper, "wrapper available, continuing wrap");
        let result = match self.ctx.sender() {
            Err(error) => Err(Halt::Failed(None, error)),
            Ok(owner) => {
                self.approve_and_wrap(erc20, wrapper, owner, amount, generation)
                    .await
            }
        };
        Some(self.settle(generation, result).await)
    }

    async fn create(&self, erc20: Address, amount: U256, generation: u64) -> Result<WrapOutcome, Halt> {
        self.enter(generation, WrapStep::Create).await?;
        info!(%erc20, "creating confidential wrapper");
        let receipt = self
            .ctx
            .contracts
            .create_confidential_token(erc20)
            .await
            .map_err(failed(WrapStep::Create))?;

        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return Err(Halt::Cancelled);
            }
            state.completed.insert(WrapStep::Create);
            state.phase = Phase::AwaitingWrapper { amount };
        }

        self.ctx.events.emit(OperationEvent::WrapperCreated {
            erc20,
            tx_hash: receipt.tx_hash,
        });
        self.ctx.events.emit(OperationEvent::RefreshRequested);
        Ok(WrapOutcome::AwaitingWrapper { erc20, receipt })
    }

    async fn approve_and_wrap(
        &self,
        erc20: Address,
        wrapper: Address,
        owner: Address,
        amount: U256,
        generation: u64,
    ) -> Result<WrapOutcome, Halt> {
        // Always read on-chain; a value captured earlier may predate a confirmed approval.
        let allowance = self
            .ctx
            .contracts
            .allowance(erc20, owner, wrapper)
            .await
            .map_err(failed(WrapStep::Approve))?;

        if allowance < amount {
            self.enter(generation, WrapStep::Approve).await?;
            info!(%erc20, %wrapper, %amount, "approving wrapper");
            self.ctx
                .contracts
                .approve(erc20, wrapper, amount)
                .await
                .map_err(failed(WrapStep::Approve))?;
            self.complete(generation, WrapStep::Approve).await?;

            let refreshed = self
                .ctx
                .contracts
                .allowance(erc20, owner, wrapper)
                .await
                .map_err(failed(WrapStep::Approve))?;
            if refreshed < amount {
                return Err(Halt::Failed(
                    Some(WrapStep::Approve),
                    OperationError::Contract(ContractFailure {
                        kind: ContractFailureKind::InsufficientAllowance,
                        detail: format!("allowance {refreshed} below {amount} after approval"),
                    }),
                ));
            }
        } else {
            debug!(%erc20, %allowance, "allowance sufficient, skipping approve");
        }

        self.enter(generation, WrapStep::Wrap).await?;
        info!(%wrapper, %amount, "wrapping");
        let receipt = self
            .ctx
            .contracts
            .wrap(wrapper, owner, amount)
            .await
            .map_err(failed(WrapStep::Wrap))?;

        self.ctx.balances.clear_balance(wrapper).await;
        self.ctx.events.emit(OperationEvent::Wrapped {
            wrapper,
            tx_hash: receipt.tx_hash,
        });
        self.ctx.events.emit(OperationEvent::RefreshRequested);

        let completed_steps = {
            let mut state = self.state.lock().await;
            if state.generation == generation {
                state.completed.insert(WrapStep::Wrap);
                state.phase = Phase::Idle;
                std::mem::take(&mut state.completed)
            } else {
                BTreeSet::from([WrapStep::Wrap])
            }
        };
        info!(%wrapper, tx = %receipt.tx_hash, "wrap complete");

        Ok(WrapOutcome::Wrapped {
            wrapper,
            receipt,
            completed_steps,
        })
    }

    async fn enter(&self, generation: u64, step: WrapStep) -> Result<(), Halt> {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return Err(Halt::Cancelled);
        }
        state.phase = Phase::Running(step);
        Ok(())
    }

    async fn complete(&self, generation: u64, step: WrapStep) -> Result<(), Halt> {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return Err(Halt::Cancelled);
        }
        state.completed.insert(step);
        Ok(())
    }

    async fn settle(
        &self,
        generation: u64,
        result: Result<WrapOutcome, Halt>,
    ) -> Result<WrapOutcome, OperationError> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(Halt::Cancelled) => {
                info!("token pair changed, wrap sequence detached");
                Ok(WrapOutcome::Cancelled)
            }
            Err(Halt::Failed(step, error)) => {
                warn!(?step, error = %error, "wrap step failed");
                let mut state = self.state.lock().await;
                if state.generation == generation {
                    state.phase = Phase::Idle;
                    state.error = Some(StepError::new(step, error.clone()));
                }
                Err(error)
            }
        }
    }
}

fn retarget(state: &mut WrapState, pair: TokenPair) {
    let same = state
        .pair
        .as_ref()
        .is_some_and(|p| p.erc20_address == pair.erc20_address);
    if !same {
        debug!(erc20 = %pair.erc20_address, "wrap target changed");
        state.generation += 1;
        state.phase = Phase::Idle;
        state.completed.clear();
        state.error = None;
    }
    state.pair = Some(pair);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::token::TokenMetadata;
    use crate::adapters::mock_contracts::MockContracts;
    use crate::adapters::mock_fhe::MockFheEngine;
    use crate::adapters::mock_wallet::MockWallet;
    use crate::orchestrator::fixtures::{harness, Harness};

    const ERC20: Address = Address::repeat_byte(0xE2);

    type MockWrap = WrapOrchestrator<MockContracts, MockFheEngine, MockWallet>;

    async fn setup(balance: u64) -> (Harness, MockWrap) {
        let h = harness();
        h.chain
            .add_token(
                ERC20,
                TokenMetadata {
                    name: "USD Coin".into(),
                    symbol: "USDC".into(),
                    decimals: 6,
                },
                U256::from(balance),
            )
            .await;
        let wrap = WrapOrchestrator::new(h.ctx.clone());
        (h, wrap)
    }

    fn pair(wrapper: Option<Address>, balance: u64) -> TokenPair {
        TokenPair {
            erc20_address: ERC20,
            erc20_name: "USD Coin".into(),
            erc20_symbol: "USDC".into(),
            erc20_decimals: 6,
            erc20_balance: U256::from(balance),
            wrapped_address: wrapper,
            wrapped_balance: None,
            is_mainstream: true,
            is_custom: false,
        }
    }

    #[tokio::test]
    async fn creation_pauses_until_pair_refreshed() {
        let (h, wrap) = setup(1_000).await;
        wrap.set_pair(pair(None, 1_000)).await;

        let outcome = wrap.start(U256::from(100)).await.unwrap();

        assert!(matches!(outcome, WrapOutcome::AwaitingWrapper { erc20, .. } if erc20 == ERC20));
        let progress = wrap.progress().await;
        assert!(progress.awaiting_wrapper);
        assert_eq!(progress.completed_steps, BTreeSet::from([WrapStep::Create]));
        assert_eq!(h.chain.call_count("wrap").await, 0);
    }

    #[tokio::test]
    async fn repeated_pair_signal_continues_once() {
        let (h, wrap) = setup(1_000).await;
        wrap.set_pair(pair(None, 1_000)).await;
        wrap.start(U256::from(100)).await.unwrap();
        let wrapper = h.chain.wrapper_for(ERC20).await.unwrap();
        let refreshed = pair(Some(wrapper), 1_000);

        let first = wrap.on_pair_updated(refreshed.clone()).await;
        let second = wrap.on_pair_updated(refreshed).await;

        let Some(Ok(WrapOutcome::Wrapped { completed_steps, .. })) = first else {
            panic!("expected wrap to complete");
        };
        assert_eq!(
            completed_steps,
            BTreeSet::from([WrapStep::Create, WrapStep::Approve, WrapStep::Wrap])
        );
        assert!(second.is_none());
        assert_eq!(h.chain.call_count("approve").await, 1);
        assert_eq!(h.chain.call_count("wrap").await, 1);
    }

    #[tokio::test]
    async fn concurrent_pair_signals_continue_once() {
        let (h, wrap) = setup(1_000).await;
        wrap.set_pair(pair(None, 1_000)).await;
        wrap.start(U256::from(100)).await.unwrap();
        let wrapper = h.chain.wrapper_for(ERC20).await.unwrap();
        let refreshed = pair(Some(wrapper), 1_000);

        let (a, b) = tokio::join!(
            wrap.on_pair_updated(refreshed.clone()),
            wrap.on_pair_updated(refreshed.clone()),
        );

        assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
        assert_eq!(h.chain.call_count("wrap").await, 1);
    }

    #[tokio::test]
    async fn pair_without_wrapper_keeps_waiting() {
        let (h, wrap) = setup(1_000).await;
        wrap.set_pair(pair(None, 1_000)).await;
        wrap.start(U256::from(100)).await.unwrap();

        assert!(wrap.on_pair_updated(pair(None, 1_000)).await.is_none());
        assert!(wrap.progress().await.awaiting_wrapper);

        let wrapper = h.chain.wrapper_for(ERC20).await.unwrap();
        assert!(wrap.on_pair_updated(pair(Some(wrapper), 1_000)).await.is_some());
    }

    #[tokio::test]
    async fn sufficient_allowance_skips_approve() {
        let (h, wrap) = setup(1_000).await;
        let wrapper = Address::repeat_byte(0xC1);
        h.chain.add_wrapper(ERC20, wrapper).await;
        h.chain.set_allowance(ERC20, wrapper, U256::from(500)).await;
        wrap.set_pair(pair(Some(wrapper), 1_000)).await;

        let outcome = wrap.start(U256::from(100)).await.unwrap();

        let WrapOutcome::Wrapped { completed_steps, .. } = outcome else {
            panic!("expected wrap");
        };
        assert_eq!(completed_steps, BTreeSet::from([WrapStep::Wrap]));
        assert_eq!(h.chain.call_count("approve").await, 0);
    }

    #[tokio::test]
    async fn wrap_clears_balance_before_event() {
        let (h, wrap) = setup(1_000).await;
        let wrapper = Address::repeat_byte(0xC1);
        h.chain.add_wrapper(ERC20, wrapper).await;
        h.decrypted_balance(wrapper, 50).await;
        assert_eq!(h.ctx.balances.get_state(wrapper).await.decrypted_value, Some(50));

        let mut events = h.ctx.events.subscribe();
        wrap.set_pair(pair(Some(wrapper), 1_000)).await;
        wrap.start(U256::from(100)).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), OperationEvent::Wrapped { .. }));
        assert_eq!(h.ctx.balances.get_state(wrapper).await.decrypted_value, None);
    }

    #[tokio::test]
    async fn failed_step_keeps_completed_and_allows_retry() {
        let (h, wrap) = setup(1_000).await;
        let wrapper = Address::repeat_byte(0xC1);
        h.chain.add_wrapper(ERC20, wrapper).await;
        h.chain.fail_next("wrap", "execution reverted").await;
        wrap.set_pair(pair(Some(wrapper), 1_000)).await;

        let err = wrap.start(U256::from(100)).await.unwrap_err();
        assert!(matches!(err, OperationError::Contract(_)));

        let progress = wrap.progress().await;
        assert_eq!(progress.current_step, None);
        assert_eq!(progress.completed_steps, BTreeSet::from([WrapStep::Approve]));
        assert_eq!(progress.error.unwrap().step, Some(WrapStep::Wrap));

        // Allowance from the first attempt is still there.
        let outcome = wrap.start(U256::from(100)).await.unwrap();
        assert!(matches!(outcome, WrapOutcome::Wrapped { .. }));
        assert_eq!(h.chain.call_count("approve").await, 1);
    }

    #[tokio::test]
    async fn rejects_invalid_amounts() {
        let (_h, wrap) = setup(1_000).await;
        wrap.set_pair(pair(None, 1_000)).await;

        assert!(matches!(
            wrap.start(U256::ZERO).await,
            Err(OperationError::Validation(_))
        ));
        assert!(matches!(
            wrap.start(U256::from(1_001)).await,
            Err(OperationError::Validation(_))
        ));
        assert!(wrap.progress().await.error.is_some());
    }

    #[tokio::test]
    async fn disconnected_wallet_is_a_missing_requirement() {
        let (h, wrap) = setup(1_000).await;
        h.wallet.set_address(None);
        wrap.set_pair(pair(None, 1_000)).await;

        let err = wrap.start(U256::from(1)).await.unwrap_err();
        assert!(matches!(err, OperationError::RequirementsNotMet(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn switching_pair_drops_pending_continuation() {
        let (h, wrap) = setup(1_000).await;
        wrap.set_pair(pair(None, 1_000)).await;
        wrap.start(U256::from(100)).await.unwrap();

        let mut other = pair(None, 10);
        other.erc20_address = Address::repeat_byte(0xE3);
        wrap.set_pair(other).await;

        let wrapper = h.chain.wrapper_for(ERC20).await.unwrap();
        assert!(wrap.on_pair_updated(pair(Some(wrapper), 1_000)).await.is_none());
        assert_eq!(h.chain.call_count("wrap").await, 0);
        assert!(wrap.progress().await.completed_steps.is_empty());
    }

    #[tokio::test]
    async fn continuation_rechecks_refreshed_balance() {
        let (h, wrap) = setup(1_000).await;
        wrap.set_pair(pair(None, 1_000)).await;
        wrap.start(U256::from(100)).await.unwrap();
        let wrapper = h.chain.wrapper_for(ERC20).await.unwrap();

        let resumed = wrap.on_pair_updated(pair(Some(wrapper), 50)).await;

        assert!(matches!(resumed, Some(Err(OperationError::Validation(_)))));
        assert_eq!(h.chain.call_count("approve").await, 0);
        assert_eq!(h.chain.call_count("wrap").await, 0);
        let progress = wrap.progress().await;
        assert!(!progress.awaiting_wrapper);
        assert!(progress.error.is_some());
        assert_eq!(progress.completed_steps, BTreeSet::from([WrapStep::Create]));
    }

    #[tokio::test]
    async fn abandoned_start_allows_retry() {
        let (h, wrap) = setup(1_000).await;
        let wrapper = Address::repeat_byte(0xC1);
        h.chain.add_wrapper(ERC20, wrapper).await;
        wrap.set_pair(pair(Some(wrapper), 1_000)).await;

        tokio::select! {
            biased;
            _ = wrap.start(U256::from(100)) => panic!("wrap should still be in flight"),
            _ = std::future::ready(()) => {}
        }
        assert_eq!(wrap.progress().await.current_step, None);

        let outcome = wrap.start(U256::from(100)).await.unwrap();
        assert!(matches!(outcome, WrapOutcome::Wrapped { .. }));
        assert_eq!(h.chain.call_count("wrap").await, 1);
    }
}

