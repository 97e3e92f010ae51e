use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::token::TokenMetadata;
use crate::ports::contracts::{ContractError, ContractPort};
use crate::ports::TxReceipt;

/// A recorded `finalizeUnwrap` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeCall {
    pub wrapper: Address,
    pub burnt_amount: B256,
    pub cleartext_amount: u64,
    pub proof: Bytes,
}

/// A recorded `unwrap` or `confidentialTransfer` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedCall {
    pub wrapper: Address,
    pub to: Address,
    pub encrypted_amount: B256,
    pub proof: Bytes,
}

#[derive(Default)]
struct Ledger {
    metadata: HashMap<Address, TokenMetadata>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    /// erc20 → wrapper
    wrappers: HashMap<Address, Address>,
    /// (wrapper, owner) → balance handle
    handles: HashMap<(Address, Address), B256>,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, String>,
    finalized: Vec<FinalizeCall>,
    unwraps: Vec<EncryptedCall>,
    transfers: Vec<EncryptedCall>,
    tx_count: u64,
}

impl Ledger {
    fn record(&mut self, method: &'static str) -> Result<(), ContractError> {
        *self.calls.entry(method).or_default() += 1;
        match self.failures.remove(method) {
            Some(message) => Err(ContractError::Reverted(message)),
            None => Ok(()),
        }
    }

    fn receipt(&mut self) -> TxReceipt {
        self.tx_count += 1;
        TxReceipt {
            tx_hash: tx_hash(self.tx_count),
            block_number: Some(self.tx_count),
            success: true,
        }
    }

    fn underlying(&self, wrapper: Address) -> Result<Address, ContractError> {
        self.wrappers
            .iter()
            .find(|(_, w)| **w == wrapper)
            .map(|(erc20, _)| *erc20)
            .ok_or_else(|| ContractError::Reverted(format!("unknown wrapper {wrapper}")))
    }

    fn rotate_handle(&mut self, wrapper: Address, owner: Address) {
        let seed = self.tx_count.to_be_bytes();
        let mut preimage = Vec::with_capacity(48);
        preimage.extend_from_slice(wrapper.as_slice());
        preimage.extend_from_slice(owner.as_slice());
        preimage.extend_from_slice(&seed);
        self.handles.insert((wrapper, owner), keccak256(&preimage));
    }
}

fn tx_hash(n: u64) -> B256 {
    B256::from(U256::from(n))
}

/// In-memory chain for testing: ERC20 balances and allowances, a wrapper
/// factory, and confidential balance handles. Every call is counted and any
/// method can be told to revert once.
///
/// Writes are sent from a single account (`sender`), as a connected wallet would.
pub struct MockContracts {
    sender: Address,
    ledger: Mutex<Ledger>,
}

impl MockContracts {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Register an ERC20 and credit `sender` with `balance`.
    pub async fn add_token(&self, erc20: Address, metadata: TokenMetadata, balance: U256) {
        let mut ledger = self.ledger.lock().await;
        ledger.metadata.insert(erc20, metadata);
        ledger.balances.insert((erc20, self.sender), balance);
    }

    /// Pretend the factory already deployed `wrapper` for `erc20`.
    pub async fn add_wrapper(&self, erc20: Address, wrapper: Address) {
        self.ledger.lock().await.wrappers.insert(erc20, wrapper);
    }

    pub async fn set_confidential_handle(&self, wrapper: Address, owner: Address, handle: B256) {
        self.ledger.lock().await.handles.insert((wrapper, owner), handle);
    }

    pub async fn set_allowance(&self, erc20: Address, spender: Address, amount: U256) {
        self.ledger
            .lock()
            .await
            .allowances
            .insert((erc20, self.sender, spender), amount);
    }

    /// Make the next call to `method` revert with `message`.
    pub async fn fail_next(&self, method: &'static str, message: &str) {
        self.ledger
            .lock()
            .await
            .failures
            .insert(method, message.to_string());
    }

    pub async fn call_count(&self, method: &str) -> usize {
        self.ledger.lock().await.calls.get(method).copied().unwrap_or(0)
    }

    /// Hash the next confirmed transaction will carry.
    pub async fn peek_next_tx_hash(&self) -> B256 {
        tx_hash(self.ledger.lock().await.tx_count + 1)
    }

    pub async fn wrapper_for(&self, erc20: Address) -> Option<Address> {
        self.ledger.lock().await.wrappers.get(&erc20).copied()
    }

    pub async fn finalize_calls(&self) -> Vec<FinalizeCall> {
        self.ledger.lock().await.finalized.clone()
    }

    pub async fn unwrap_calls(&self) -> Vec<EncryptedCall> {
        self.ledger.lock().await.unwraps.clone()
    }

    pub async fn transfer_calls(&self) -> Vec<EncryptedCall> {
        self.ledger.lock().await.transfers.clone()
    }
}

impl ContractPort for MockContracts {
    async fn token_metadata(&self, erc20: Address) -> Result<TokenMetadata, ContractError> {
        let mut ledger = self.ledger.lock().await;
        ledger.record("token_metadata")?;
        ledger
            .metadata
            .get(&erc20)
            .cloned()
            .ok_or_else(|| ContractError::Rpc(format!("no ERC20 at {erc20}")))
    }

    async fn balance_of(&self, erc20: Address, owner: Address) -> Result<U256, ContractError> {
        let mut ledger = self.ledger.lock().await;
        ledger.record("balance_of")?;
        Ok(ledger.balances.get(&(erc20, owner)).copied().unwrap_or_default())
    }

    async fn allowance(
        &self,
        erc20: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ContractError> {
        let mut ledger = self.ledger.lock().await;
        ledger.record("allowance")?;
        Ok(ledger
            .allowances
            .get(&(erc20, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn approve(
        &self,
        erc20: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxReceipt, ContractError> {
        tokio::task::yield_now().await;
        let mut ledger = self.ledger.lock().await;
        ledger.record("approve")?;
        ledger.allowances.insert((erc20, self.sender, spender), amount);
        Ok(ledger.receipt())
    }

    async fn confidential_balance_of(
        &self,
        wrapper: Address,
        owner: Address,
    ) -> Result<B256, ContractError> {
        // Suspend once so concurrent callers interleave like real I/O.
        tokio::task::yield_now().await;
        let mut ledger = self.ledger.lock().await;
        ledger.record("confidential_balance_of")?;
        Ok(ledger.handles.get(&(wrapper, owner)).copied().unwrap_or(B256::ZERO))
    }

    async fn wrap(&self, wrapper: Address, to: Address, amount: U256) -> Result<TxReceipt, ContractError> {
        tokio::task::yield_now().await;
        let mut ledger = self.ledger.lock().await;
        ledger.record("wrap")?;
        let erc20 = ledger.underlying(wrapper)?;

        let allowance = ledger
            .allowances
            .get(&(erc20, self.sender, wrapper))
            .copied()
            .unwrap_or_default();
        if allowance < amount {
            return Err(ContractError::Reverted("ERC20InsufficientAllowance".into()));
        }
        let balance = ledger.balances.get(&(erc20, self.sender)).copied().unwrap_or_default();
        if balance < amount {
            return Err(ContractError::Reverted("ERC20InsufficientBalance".into()));
        }

        ledger.allowances.insert((erc20, self.sender, wrapper), allowance - amount);
        ledger.balances.insert((erc20, self.sender), balance - amount);
        let receipt = ledger.receipt();
        ledger.rotate_handle(wrapper, to);
        Ok(receipt)
    }

    async fn unwrap(
        &self,
        wrapper: Address,
        from: Address,
        to: Address,
        encrypted_amount: B256,
        input_proof: Bytes,
    ) -> Result<TxReceipt, ContractError> {
        tokio::task::yield_now().await;
        let mut ledger = self.ledger.lock().await;
        ledger.record("unwrap")?;
        ledger.unwraps.push(EncryptedCall {
            wrapper,
            to,
            encrypted_amount,
            proof: input_proof,
        });
        let receipt = ledger.receipt();
        ledger.rotate_handle(wrapper, from);
        Ok(receipt)
    }

    async fn finalize_unwrap(
        &self,
        wrapper: Address,
        burnt_amount: B256,
        cleartext_amount: u64,
        decryption_proof: Bytes,
    ) -> Result<TxReceipt, ContractError> {
        tokio::task::yield_now().await;
        let mut ledger = self.ledger.lock().await;
        ledger.record("finalize_unwrap")?;
        ledger.finalized.push(FinalizeCall {
            wrapper,
            burnt_amount,
            cleartext_amount,
            proof: decryption_proof,
        });
        Ok(ledger.receipt())
    }

    async fn confidential_transfer(
        &self,
        wrapper: Address,
        to: Address,
        encrypted_amount: B256,
        input_proof: Bytes,
    ) -> Result<TxReceipt, ContractError> {
        tokio::task::yield_now().await;
        let mut ledger = self.ledger.lock().await;
        ledger.record("confidential_transfer")?;
        ledger.transfers.push(EncryptedCall {
            wrapper,
            to,
            encrypted_amount,
            proof: input_proof,
        });
        let receipt = ledger.receipt();
        let sender = self.sender;
        ledger.rotate_handle(wrapper, sender);
        Ok(receipt)
    }

    async fn create_confidential_token(&self, erc20: Address) -> Result<TxReceipt, ContractError> {
        tokio::task::yield_now().await;
        let mut ledger = self.ledger.lock().await;
        ledger.record("create_confidential_token")?;
        if ledger.wrappers.contains_key(&erc20) {
            return Err(ContractError::Reverted("wrapper already exists".into()));
        }
        let wrapper = Address::from_slice(&keccak256(erc20.as_slice())[12..]);
        ledger.wrappers.insert(erc20, wrapper);
        Ok(ledger.receipt())
    }

    async fn get_confidential_token(&self, erc20: Address) -> Result<Address, ContractError> {
        let mut ledger = self.ledger.lock().await;
        ledger.record("get_confidential_token")?;
        Ok(ledger.wrappers.get(&erc20).copied().unwrap_or(Address::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> TokenMetadata {
        TokenMetadata {
            name: "USD Coin".into(),
            symbol: "USDC".into(),
            decimals: 6,
        }
    }

    #[tokio::test]
    async fn factory_reports_zero_until_created() {
        let chain = MockContracts::new(Address::repeat_byte(0x01));
        let erc20 = Address::repeat_byte(0xE2);

        assert_eq!(chain.get_confidential_token(erc20).await.unwrap(), Address::ZERO);
        chain.create_confidential_token(erc20).await.unwrap();
        assert_ne!(chain.get_confidential_token(erc20).await.unwrap(), Address::ZERO);
    }

    #[tokio::test]
    async fn wrap_requires_allowance() {
        let sender = Address::repeat_byte(0x01);
        let chain = MockContracts::new(sender);
        let erc20 = Address::repeat_byte(0xE2);
        let wrapper = Address::repeat_byte(0xC2);
        chain.add_token(erc20, usdc(), U256::from(1_000)).await;
        chain.add_wrapper(erc20, wrapper).await;

        let err = chain.wrap(wrapper, sender, U256::from(10)).await.unwrap_err();
        assert!(err.to_string().contains("InsufficientAllowance"));

        chain.approve(erc20, wrapper, U256::from(10)).await.unwrap();
        chain.wrap(wrapper, sender, U256::from(10)).await.unwrap();
        assert_eq!(chain.balance_of(erc20, sender).await.unwrap(), U256::from(990));
        assert_ne!(chain.confidential_balance_of(wrapper, sender).await.unwrap(), B256::ZERO);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let chain = MockContracts::new(Address::repeat_byte(0x01));
        chain.fail_next("get_confidential_token", "boom").await;

        assert!(chain.get_confidential_token(Address::ZERO).await.is_err());
        assert!(chain.get_confidential_token(Address::ZERO).await.is_ok());
        assert_eq!(chain.call_count("get_confidential_token").await, 2);
    }

    #[tokio::test]
    async fn receipts_carry_predictable_hashes() {
        let chain = MockContracts::new(Address::repeat_byte(0x01));
        let expected = chain.peek_next_tx_hash().await;
        let receipt = chain
            .create_confidential_token(Address::repeat_byte(0xE2))
            .await
            .unwrap();
        assert_eq!(receipt.tx_hash, expected);
    }
}
