use alloy::primitives::Address;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{InFlight, OperationContext};
use crate::errors::{OperationError, StepError};
use crate::events::OperationEvent;
use crate::ports::contracts::ContractPort;
use crate::ports::fhe::FheEngine;
use crate::ports::wallet::WalletPort;
use crate::ports::TxReceipt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStep {
    Encrypt,
    Submit,
}

/// Why a transfer cannot be submitted right now.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferBlock {
    #[error("no confidential wrapper for this token")]
    NoWrapper,

    #[error("requirements not met: {0}")]
    RequirementsNotMet(String),

    #[error("decrypt your balance before transferring")]
    BalanceNotDecrypted,
}

impl From<TransferBlock> for OperationError {
    fn from(block: TransferBlock) -> Self {
        match block {
            TransferBlock::RequirementsNotMet(missing) => OperationError::RequirementsNotMet(missing),
            other => OperationError::Validation(other.to_string()),
        }
    }
}

/// User input for a transfer, kept until the transfer confirms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferDraft {
    pub recipient: String,
    pub amount: Option<u64>,
}

#[derive(Default)]
struct TransferState {
    wrapper: Option<Address>,
    draft: TransferDraft,
    error: Option<StepError<TransferStep>>,
}

/// Confidential transfer of a wrapped token.
pub struct TransferOrchestrator<C: ContractPort, E: FheEngine, W: WalletPort> {
    ctx: OperationContext<C, E, W>,
    state: Mutex<TransferState>,
    submitting: InFlight<()>,
}

impl<C: ContractPort, E: FheEngine, W: WalletPort> TransferOrchestrator<C, E, W> {
    pub fn new(ctx: OperationContext<C, E, W>) -> Self {
        Self {
            ctx,
            state: Mutex::new(TransferState::default()),
            submitting: InFlight::new(),
        }
    }

    pub async fn set_wrapper(&self, wrapper: Option<Address>) {
        let mut state = self.state.lock().await;
        if state.wrapper != wrapper {
            state.wrapper = wrapper;
            state.draft = TransferDraft::default();
            state.error = None;
        }
    }

    pub async fn set_recipient(&self, recipient: impl Into<String>) {
        self.state.lock().await.draft.recipient = recipient.into();
    }

    pub async fn set_amount(&self, amount: Option<u64>) {
        self.state.lock().await.draft.amount = amount;
    }

    pub async fn draft(&self) -> TransferDraft {
        self.state.lock().await.draft.clone()
    }

    pub async fn error(&self) -> Option<StepError<TransferStep>> {
        self.state
            .lock()
            .await
            .error
            .clone()
            .filter(StepError::is_visible)
    }

    /// `Ok` when the transfer action may be offered.
    ///
    /// Blocked without a wrapper, with unmet decryption requirements, or
    /// before the balance has been decrypted in this session.
    pub async fn availability(&self) -> Result<Address, TransferBlock> {
        let wrapper = self
            .state
            .lock()
            .await
            .wrapper
            .ok_or(TransferBlock::NoWrapper)?;

        let requirements = self.ctx.balances.requirements();
        if !requirements.can_decrypt {
            return Err(TransferBlock::RequirementsNotMet(
                requirements.missing_message.unwrap_or_default(),
            ));
        }

        if !self.ctx.balances.get_state(wrapper).await.has_decrypted() {
            return Err(TransferBlock::BalanceNotDecrypted);
        }
        Ok(wrapper)
    }

    /// Send the drafted transfer. The draft is cleared once it confirms.
    pub async fn submit(&self) -> Result<TxReceipt, OperationError> {
        let wrapper = self.availability().await?;
        let sender = self.ctx.sender()?;

        let Ok(submitting) = self.submitting.claim(()) else {
            return Err(OperationError::Busy("a transfer is already in progress".into()));
        };
        let (recipient, amount) = {
            let mut state = self.state.lock().await;
            match self.validate(wrapper, &state.draft).await {
                Ok(parsed) => {
                    state.error = None;
                    parsed
                }
                Err(error) => {
                    state.error = Some(StepError::new(None, error.clone()));
                    return Err(error);
                }
            }
        };

        let result = self.send(wrapper, sender, recipient, amount).await;
        drop(submitting);

        let mut state = self.state.lock().await;
        match result {
            Ok(receipt) => {
                state.draft = TransferDraft::default();
                Ok(receipt)
            }
            Err((step, error)) => {
                warn!(?step, error = %error, "transfer failed");
                state.error = Some(StepError::new(Some(step), error.clone()));
                Err(error)
            }
        }
    }

    async fn validate(
        &self,
        wrapper: Address,
        draft: &TransferDraft,
    ) -> Result<(Address, u64), OperationError> {
        let recipient: Address = draft
            .recipient
            .trim()
            .parse()
            .map_err(|_| OperationError::Validation("invalid recipient address".into()))?;
        if recipient == Address::ZERO {
            return Err(OperationError::Validation(
                "recipient must not be the zero address".into(),
            ));
        }

        let amount = draft
            .amount
            .filter(|a| *a > 0)
            .ok_or_else(|| OperationError::Validation("amount must be greater than zero".into()))?;

        let balance = self
            .ctx
            .balances
            .get_state(wrapper)
            .await
            .authoritative_value()
            .unwrap_or_default();
        if amount > balance {
            return Err(OperationError::Validation(
                "amount exceeds confidential balance".into(),
            ));
        }

        Ok((recipient, amount))
    }

    async fn send(
        &self,
        wrapper: Address,
        sender: Address,
        recipient: Address,
        amount: u64,
    ) -> Result<TxReceipt, (TransferStep, OperationError)> {
        let encrypted = self
            .ctx
            .fhe
            .encrypt_amount(wrapper, sender, amount)
            .await
            .map_err(|e| (TransferStep::Encrypt, e.into()))?;

        info!(%wrapper, %recipient, "sending confidential transfer");
        let receipt = self
            .ctx
            .contracts
            .confidential_transfer(wrapper, recipient, encrypted.handle, encrypted.proof)
            .await
            .map_err(|e| (TransferStep::Submit, e.into()))?;

        self.ctx.balances.clear_balance(wrapper).await;
        self.ctx.events.emit(OperationEvent::Transferred {
            wrapper,
            tx_hash: receipt.tx_hash,
        });
        self.ctx.events.emit(OperationEvent::RefreshRequested);
        Ok(receipt)
    }
}
