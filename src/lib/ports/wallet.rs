use alloy::primitives::{Address, Bytes};
use std::future::Future;

use super::fhe::UserDecryptTypedData;

/// Port for the connected wallet.
///
/// Implementations:
/// - `LocalWallet` (alloy `PrivateKeySigner`)
/// - `MockWallet` for testing
pub trait WalletPort: Send + Sync {
    /// Connected account, `None` when disconnected.
    fn address(&self) -> Option<Address>;

    /// Whether the signer has been initialized and can produce signatures.
    fn is_signer_ready(&self) -> bool;

    /// Sign the EIP-712 user-decryption authorization.
    fn sign_typed_data(
        &self,
        typed_data: &UserDecryptTypedData,
    ) -> impl Future<Output = Result<Bytes, WalletError>> + Send;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletError {
    #[error("wallet not connected")]
    NotConnected,

    #[error("user rejected the signature request: {0}")]
    Rejected(String),

    #[error("signing failed: {0}")]
    Signing(String),
}
