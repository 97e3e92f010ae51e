use alloy::{
    network::EthereumWallet,
    primitives::{Address, Bytes, B256, U256},
    providers::{DynProvider, ProviderBuilder},
    signers::local::PrivateKeySigner,
};

use super::abi::{IConfidentialWrapper, IWrapperFactory, IERC20};
use crate::domain::token::TokenMetadata;
use crate::ports::contracts::{ContractError, ContractPort};
use crate::ports::TxReceipt;

/// Ethereum RPC adapter for the ERC20, wrapper and factory contracts.
#[derive(Clone)]
pub struct EthereumRpc {
    provider: DynProvider,
    factory: Address,
    can_send: bool,
}

impl EthereumRpc {
    /// Build a provider. Without a private key the adapter is read-only and
    /// every write fails with `ContractError::NoSigner`.
    pub fn new(
        rpc_url: &str,
        private_key: Option<&str>,
        factory: Address,
    ) -> Result<Self, ContractError> {
        let url = rpc_url
            .parse()
            .map_err(|e| ContractError::Rpc(format!("Invalid RPC URL: {e}")))?;

        let (provider, can_send) = match private_key {
            Some(key) => {
                let signer: PrivateKeySigner = key
                    .parse()
                    .map_err(|e| ContractError::Rpc(format!("Invalid private key: {e}")))?;
                let wallet = EthereumWallet::from(signer);
                (
                    DynProvider::new(ProviderBuilder::new().wallet(wallet).connect_http(url)),
                    true,
                )
            }
            None => (DynProvider::new(ProviderBuilder::new().connect_http(url)), false),
        };

        Ok(Self {
            provider,
            factory,
            can_send,
        })
    }

    fn ensure_signer(&self) -> Result<(), ContractError> {
        if self.can_send {
            Ok(())
        } else {
            Err(ContractError::NoSigner)
        }
    }

    fn convert_receipt(
        receipt: &alloy::rpc::types::TransactionReceipt,
        what: &str,
    ) -> Result<TxReceipt, ContractError> {
        if !receipt.status() {
            return Err(ContractError::Reverted(format!("{what} reverted")));
        }
        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            success: true,
        })
    }
}

fn rpc(e: impl std::fmt::Display) -> ContractError {
    ContractError::Rpc(e.to_string())
}

fn tx_failed(e: impl std::fmt::Display) -> ContractError {
    ContractError::TransactionFailed(e.to_string())
}

impl ContractPort for EthereumRpc {
    async fn token_metadata(&self, erc20: Address) -> Result<TokenMetadata, ContractError> {
        let token = IERC20::new(erc20, &self.provider);
        let (name, symbol, decimals) = tokio::try_join!(
            async { token.name().call().await.map_err(rpc) },
            async { token.symbol().call().await.map_err(rpc) },
            async { token.decimals().call().await.map_err(rpc) },
        )?;
        Ok(TokenMetadata {
            name,
            symbol,
            decimals,
        })
    }

    async fn balance_of(&self, erc20: Address, owner: Address) -> Result<U256, ContractError> {
        let token = IERC20::new(erc20, &self.provider);
        token.balanceOf(owner).call().await.map_err(rpc)
    }

    async fn allowance(
        &self,
        erc20: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ContractError> {
        let token = IERC20::new(erc20, &self.provider);
        token.allowance(owner, spender).call().await.map_err(rpc)
    }

    async fn approve(
        &self,
        erc20: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxReceipt, ContractError> {
        self.ensure_signer()?;
        let token = IERC20::new(erc20, &self.provider);
        let receipt = token
            .approve(spender, amount)
            .send()
            .await
            .map_err(tx_failed)?
            .get_receipt()
            .await
            .map_err(tx_failed)?;
        Self::convert_receipt(&receipt, "approve")
    }

    async fn confidential_balance_of(
        &self,
        wrapper: Address,
        owner: Address,
    ) -> Result<B256, ContractError> {
        let token = IConfidentialWrapper::new(wrapper, &self.provider);
        token.confidentialBalanceOf(owner).call().await.map_err(rpc)
    }

    async fn wrap(&self, wrapper: Address, to: Address, amount: U256) -> Result<TxReceipt, ContractError> {
        self.ensure_signer()?;
        let token = IConfidentialWrapper::new(wrapper, &self.provider);
        let receipt = token
            .wrap(to, amount)
            .send()
            .await
            .map_err(tx_failed)?
            .get_receipt()
            .await
            .map_err(tx_failed)?;
        Self::convert_receipt(&receipt, "wrap")
    }

    async fn unwrap(
        &self,
        wrapper: Address,
        from: Address,
        to: Address,
        encrypted_amount: B256,
        input_proof: Bytes,
    ) -> Result<TxReceipt, ContractError> {
        self.ensure_signer()?;
        let token = IConfidentialWrapper::new(wrapper, &self.provider);
        let receipt = token
            .unwrap(from, to, encrypted_amount, input_proof)
            .send()
            .await
            .map_err(tx_failed)?
            .get_receipt()
            .await
            .map_err(tx_failed)?;
        Self::convert_receipt(&receipt, "unwrap")
    }

    async fn finalize_unwrap(
        &self,
        wrapper: Address,
        burnt_amount: B256,
        cleartext_amount: u64,
        decryption_proof: Bytes,
    ) -> Result<TxReceipt, ContractError> {
        self.ensure_signer()?;
        let token = IConfidentialWrapper::new(wrapper, &self.provider);
        let receipt = token
            .finalizeUnwrap(burnt_amount, cleartext_amount, decryption_proof)
            .send()
            .await
            .map_err(tx_failed)?
            .get_receipt()
            .await
            .map_err(tx_failed)?;
        Self::convert_receipt(&receipt, "finalizeUnwrap")
    }

    async fn confidential_transfer(
        &self,
        wrapper: Address,
        to: Address,
        encrypted_amount: B256,
        input_proof: Bytes,
    ) -> Result<TxReceipt, ContractError> {
        self.ensure_signer()?;
        let token = IConfidentialWrapper::new(wrapper, &self.provider);
        let receipt = token
            .confidentialTransfer(to, encrypted_amount, input_proof)
            .send()
            .await
            .map_err(tx_failed)?
            .get_receipt()
            .await
            .map_err(tx_failed)?;
        Self::convert_receipt(&receipt, "confidentialTransfer")
    }

    async fn create_confidential_token(&self, erc20: Address) -> Result<TxReceipt, ContractError> {
        self.ensure_signer()?;
        let factory = IWrapperFactory::new(self.factory, &self.provider);
        let receipt = factory
            .createConfidentialToken(erc20)
            .send()
            .await
            .map_err(tx_failed)?
            .get_receipt()
            .await
            .map_err(tx_failed)?;
        Self::convert_receipt(&receipt, "createConfidentialToken")
    }

    async fn get_confidential_token(&self, erc20: Address) -> Result<Address, ContractError> {
        let factory = IWrapperFactory::new(self.factory, &self.provider);
        factory.getConfidentialToken(erc20).call().await.map_err(rpc)
    }
}
