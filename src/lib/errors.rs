use std::fmt;
use std::time::{Duration, Instant};

use crate::ports::contracts::ContractError;

/// How long a transient step error stays visible before it clears itself.
pub const ERROR_DISPLAY: Duration = Duration::from_secs(5);

/// Failures of the encryption/decryption adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("FHE engine not ready")]
    EngineNotReady,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The user declined the decryption authorization. Retrying is meaningful.
    #[error("signature rejected: {0}")]
    SignatureRejected(String),
}

impl CryptoError {
    pub fn is_decryption(&self) -> bool {
        matches!(
            self,
            CryptoError::Decryption(_) | CryptoError::SignatureRejected(_)
        )
    }
}

/// Classification of a failed contract call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractFailureKind {
    InsufficientBalance,
    InsufficientAllowance,
    UserRejected,
    InsufficientGasFunds,
    InvalidProof,
    Revert,
}

impl ContractFailureKind {
    /// Classify a raw error message from the RPC layer.
    pub fn classify(message: &str) -> Self {
        let m = message.to_lowercase();
        if m.contains("user rejected") || m.contains("user denied") || m.contains("code 4001") {
            ContractFailureKind::UserRejected
        } else if m.contains("insufficient funds") {
            ContractFailureKind::InsufficientGasFunds
        } else if m.contains("insufficientallowance") || m.contains("insufficient allowance") {
            ContractFailureKind::InsufficientAllowance
        } else if m.contains("insufficientbalance") || m.contains("insufficient balance") {
            ContractFailureKind::InsufficientBalance
        } else if m.contains("invalid proof")
            || m.contains("invalidproof")
            || m.contains("invalidkmssignatures")
        {
            ContractFailureKind::InvalidProof
        } else {
            ContractFailureKind::Revert
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            ContractFailureKind::InsufficientBalance => "Insufficient token balance",
            ContractFailureKind::InsufficientAllowance => "Insufficient allowance, approve first",
            ContractFailureKind::UserRejected => "Transaction rejected in wallet",
            ContractFailureKind::InsufficientGasFunds => "Not enough ETH to pay for gas",
            ContractFailureKind::InvalidProof => "Encrypted input proof was rejected",
            ContractFailureKind::Revert => "Transaction failed",
        }
    }
}

/// A classified contract failure, keeping the raw detail for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractFailure {
    pub kind: ContractFailureKind,
    pub detail: String,
}

impl From<ContractError> for ContractFailure {
    fn from(err: ContractError) -> Self {
        let detail = err.to_string();
        Self {
            kind: ContractFailureKind::classify(&detail),
            detail,
        }
    }
}

impl fmt::Display for ContractFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.user_message())
    }
}

/// Error returned by orchestrator operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("requirements not met: {0}")]
    RequirementsNotMet(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("{0}")]
    Contract(ContractFailure),

    #[error("{0}")]
    Busy(String),
}

impl From<ContractError> for OperationError {
    fn from(err: ContractError) -> Self {
        OperationError::Contract(err.into())
    }
}

impl OperationError {
    /// Transient errors clear after [`ERROR_DISPLAY`]; missing prerequisites
    /// persist until the prerequisite is satisfied.
    pub fn is_transient(&self) -> bool {
        !matches!(self, OperationError::RequirementsNotMet(_))
    }
}

/// An error scoped to the step that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepError<S> {
    pub step: Option<S>,
    pub error: OperationError,
    pub raised_at: Instant,
}

impl<S: Copy> StepError<S> {
    pub fn new(step: Option<S>, error: OperationError) -> Self {
        Self {
            step,
            error,
            raised_at: Instant::now(),
        }
    }

    pub fn is_visible_at(&self, now: Instant) -> bool {
        !self.error.is_transient() || now.saturating_duration_since(self.raised_at) < ERROR_DISPLAY
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_revert_messages() {
        let cases = [
            ("execution reverted: ERC20InsufficientBalance(0x..)", ContractFailureKind::InsufficientBalance),
            ("ERC20InsufficientAllowance", ContractFailureKind::InsufficientAllowance),
            ("User rejected the request.", ContractFailureKind::UserRejected),
            ("insufficient funds for gas * price + value", ContractFailureKind::InsufficientGasFunds),
            ("execution reverted: InvalidKMSSignatures()", ContractFailureKind::InvalidProof),
            ("execution reverted", ContractFailureKind::Revert),
        ];
        for (message, expected) in cases {
            assert_eq!(ContractFailureKind::classify(message), expected, "{message}");
        }
    }

    #[test]
    fn contract_error_displays_user_message() {
        let err: OperationError =
            ContractError::Reverted("ERC20InsufficientAllowance".into()).into();
        assert_eq!(err.to_string(), "Insufficient allowance, approve first");
    }

    #[test]
    fn transient_errors_expire() {
        let err = StepError::<u8>::new(Some(1), OperationError::Validation("bad".into()));
        assert!(err.is_visible_at(err.raised_at));
        assert!(!err.is_visible_at(err.raised_at + ERROR_DISPLAY));
    }

    #[test]
    fn missing_requirements_persist() {
        let err = StepError::<u8>::new(
            None,
            OperationError::RequirementsNotMet("Signer".into()),
        );
        assert!(err.is_visible_at(err.raised_at + ERROR_DISPLAY * 10));
    }

    #[test]
    fn signature_rejection_is_a_decryption_error() {
        assert!(CryptoError::SignatureRejected("no".into()).is_decryption());
        assert!(!CryptoError::EngineNotReady.is_decryption());
    }
}
