use alloy::primitives::{Address, Bytes, B256, U256};
use std::future::Future;

use super::TxReceipt;
use crate::domain::token::TokenMetadata;

/// Port for the on-chain surface consumed by the client: ERC20 tokens,
/// confidential wrappers, and the wrapper factory.
///
/// Every write resolves only after the transaction is confirmed; a reverted
/// transaction is reported as `ContractError::Reverted`.
///
/// Implementations:
/// - `EthereumRpc` (alloy)
/// - `MockContracts` for testing
pub trait ContractPort: Send + Sync {
    // ── ERC20 ──

    /// Read `name`, `symbol` and `decimals` of an ERC20 token.
    fn token_metadata(
        &self,
        erc20: Address,
    ) -> impl Future<Output = Result<TokenMetadata, ContractError>> + Send;

    fn balance_of(
        &self,
        erc20: Address,
        owner: Address,
    ) -> impl Future<Output = Result<U256, ContractError>> + Send;

    fn allowance(
        &self,
        erc20: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<U256, ContractError>> + Send;

    fn approve(
        &self,
        erc20: Address,
        spender: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxReceipt, ContractError>> + Send;

    // ── Confidential wrapper ──

    /// Read the ciphertext handle of `owner`'s confidential balance.
    fn confidential_balance_of(
        &self,
        wrapper: Address,
        owner: Address,
    ) -> impl Future<Output = Result<B256, ContractError>> + Send;

    /// Lock `amount` of the underlying ERC20 and mint the encrypted equivalent to `to`.
    fn wrap(
        &self,
        wrapper: Address,
        to: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxReceipt, ContractError>> + Send;

    /// Burn an encrypted amount and open an unwrap request for `to`.
    fn unwrap(
        &self,
        wrapper: Address,
        from: Address,
        to: Address,
        encrypted_amount: B256,
        input_proof: Bytes,
    ) -> impl Future<Output = Result<TxReceipt, ContractError>> + Send;

    /// Release the underlying ERC20 for a burn whose amount was publicly decrypted.
    fn finalize_unwrap(
        &self,
        wrapper: Address,
        burnt_amount: B256,
        cleartext_amount: u64,
        decryption_proof: Bytes,
    ) -> impl Future<Output = Result<TxReceipt, ContractError>> + Send;

    fn confidential_transfer(
        &self,
        wrapper: Address,
        to: Address,
        encrypted_amount: B256,
        input_proof: Bytes,
    ) -> impl Future<Output = Result<TxReceipt, ContractError>> + Send;

    // ── Factory ──

    fn create_confidential_token(
        &self,
        erc20: Address,
    ) -> impl Future<Output = Result<TxReceipt, ContractError>> + Send;

    /// Wrapper deployed for `erc20`, or `Address::ZERO` when none exists.
    fn get_confidential_token(
        &self,
        erc20: Address,
    ) -> impl Future<Output = Result<Address, ContractError>> + Send;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContractError {
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("no signer configured for writes")]
    NoSigner,
}
