use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::token::{CustomTokenList, TokenMetadata, TokenPair};
use crate::ports::contracts::{ContractError, ContractPort};
use crate::ports::storage::{KeyValueStore, StoreError};

/// Storage key of the persisted custom token list.
pub const CUSTOM_TOKENS_KEY: &str = "customTokens";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid token address: {0}")]
    InvalidAddress(String),

    #[error("token {0} is already in the list")]
    Duplicate(Address),

    #[error("token {0} is already a mainstream token")]
    Mainstream(Address),

    #[error("token {0} is not a custom token")]
    NotFound(Address),

    #[error("token {address} does not look like an ERC20: {source}")]
    NotErc20 {
        address: Address,
        #[source]
        source: ContractError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Merges the curated token list with user-added tokens and resolves each
/// into a [`TokenPair`].
pub struct TokenPairRegistry<C: ContractPort, S: KeyValueStore> {
    contracts: Arc<C>,
    store: Arc<S>,
    mainstream: Vec<Address>,
    pairs: Mutex<Vec<TokenPair>>,
    /// Serializes read-modify-write of the persisted list.
    edit: Mutex<()>,
}

impl<C: ContractPort, S: KeyValueStore> TokenPairRegistry<C, S> {
    pub fn new(contracts: Arc<C>, store: Arc<S>, mainstream: Vec<Address>) -> Self {
        Self {
            contracts,
            store,
            mainstream,
            pairs: Mutex::new(Vec::new()),
            edit: Mutex::new(()),
        }
    }

    pub fn mainstream(&self) -> &[Address] {
        &self.mainstream
    }

    /// The persisted custom token list; empty if nothing was saved yet.
    pub async fn custom_tokens(&self) -> Result<CustomTokenList, RegistryError> {
        let Some(raw) = self.store.load(CUSTOM_TOKENS_KEY).await? else {
            return Ok(CustomTokenList::default());
        };
        let mut list: CustomTokenList =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if !list.is_aligned() {
            warn!(
                tokens = list.tokens.len(),
                added_at = list.added_at.len(),
                "custom token arrays out of step, truncating"
            );
            let len = list.tokens.len().min(list.added_at.len());
            list.tokens.truncate(len);
            list.added_at.truncate(len);
        }
        Ok(list)
    }

    async fn save(&self, list: &CustomTokenList) -> Result<(), RegistryError> {
        let raw = serde_json::to_string(list).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.store.save(CUSTOM_TOKENS_KEY, raw).await?;
        Ok(())
    }

    /// Validate and persist a user-supplied token address.
    ///
    /// The address must parse, must not already be listed, and must answer
    /// the ERC20 metadata calls.
    pub async fn add_custom_token(&self, input: &str) -> Result<TokenMetadata, RegistryError> {
        let token: Address = input
            .trim()
            .parse()
            .map_err(|_| RegistryError::InvalidAddress(input.to_string()))?;
        if self.mainstream.contains(&token) {
            return Err(RegistryError::Mainstream(token));
        }

        let _edit = self.edit.lock().await;
        let list = self.custom_tokens().await?;
        if list.contains(token) {
            return Err(RegistryError::Duplicate(token));
        }

        let metadata = self
            .contracts
            .token_metadata(token)
            .await
            .map_err(|source| RegistryError::NotErc20 {
                address: token,
                source,
            })?;

        self.save(&list.with_added(token, Utc::now().timestamp_millis()))
            .await?;
        info!(%token, symbol = %metadata.symbol, "custom token added");
        Ok(metadata)
    }

    pub async fn remove_custom_token(&self, token: Address) -> Result<(), RegistryError> {
        let _edit = self.edit.lock().await;
        let list = self.custom_tokens().await?;
        if !list.contains(token) {
            return Err(RegistryError::NotFound(token));
        }
        self.save(&list.with_removed(token)).await?;

        self.pairs
            .lock()
            .await
            .retain(|p| !(p.is_custom && p.erc20_address == token));
        info!(%token, "custom token removed");
        Ok(())
    }

    /// Rebuild every token pair. Balances are read for `owner` when a
    /// wallet is connected. Tokens whose reads fail are left out.
    pub async fn refresh(&self, owner: Option<Address>) -> Vec<TokenPair> {
        let custom = match self.custom_tokens().await {
            Ok(list) => list.addresses(),
            Err(e) => {
                warn!(error = %e, "failed to load custom tokens");
                Vec::new()
            }
        };

        let mut entries: Vec<(Address, bool)> =
            self.mainstream.iter().map(|token| (*token, true)).collect();
        for token in custom {
            if !entries.iter().any(|(t, _)| *t == token) {
                entries.push((token, false));
            }
        }

        let mut pairs = Vec::with_capacity(entries.len());
        for (token, is_mainstream) in entries {
            match self.build_pair(token, owner, is_mainstream).await {
                Ok(pair) => pairs.push(pair),
                Err(e) => warn!(%token, error = %e, "skipping token"),
            }
        }

        debug!(count = pairs.len(), "token pairs refreshed");
        *self.pairs.lock().await = pairs.clone();
        pairs
    }

    async fn build_pair(
        &self,
        token: Address,
        owner: Option<Address>,
        is_mainstream: bool,
    ) -> Result<TokenPair, ContractError> {
        let metadata = self.contracts.token_metadata(token).await?;
        let erc20_balance = match owner {
            Some(owner) => self.contracts.balance_of(token, owner).await?,
            None => U256::ZERO,
        };

        let wrapper = self.contracts.get_confidential_token(token).await?;
        let wrapped_address = (wrapper != Address::ZERO).then_some(wrapper);

        let wrapped_balance = match (wrapped_address, owner) {
            (Some(wrapper), Some(owner)) => {
                Some(self.contracts.confidential_balance_of(wrapper, owner).await?)
            }
            _ => None,
        };

        Ok(TokenPair {
            erc20_address: token,
            erc20_name: metadata.name,
            erc20_symbol: metadata.symbol,
            erc20_decimals: metadata.decimals,
            erc20_balance,
            wrapped_address,
            wrapped_balance,
            is_mainstream,
            is_custom: !is_mainstream,
        })
    }

    /// Pairs from the last refresh.
    pub async fn pairs(&self) -> Vec<TokenPair> {
        self.pairs.lock().await.clone()
    }

    pub async fn pair(&self, erc20: Address) -> Option<TokenPair> {
        self.pairs
            .lock()
            .await
            .iter()
            .find(|p| p.erc20_address == erc20)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::InMemoryKeyValueStore;
    use crate::adapters::mock_contracts::MockContracts;
    use alloy::primitives::B256;

    const USER: Address = Address::repeat_byte(0x11);
    const USDC: Address = Address::repeat_byte(0xA1);
    const CUSTOM: Address = Address::repeat_byte(0xA2);

    fn meta(symbol: &str) -> TokenMetadata {
        TokenMetadata {
            name: format!("{symbol} Token"),
            symbol: symbol.into(),
            decimals: 18,
        }
    }

    async fn setup() -> (
        Arc<MockContracts>,
        Arc<InMemoryKeyValueStore>,
        TokenPairRegistry<MockContracts, InMemoryKeyValueStore>,
    ) {
        let chain = Arc::new(MockContracts::new(USER));
        chain.add_token(USDC, meta("USDC"), U256::from(1_000)).await;
        chain.add_token(CUSTOM, meta("CSTM"), U256::from(7)).await;
        let store = Arc::new(InMemoryKeyValueStore::new());
        let registry = TokenPairRegistry::new(Arc::clone(&chain), Arc::clone(&store), vec![USDC]);
        (chain, store, registry)
    }

    #[tokio::test]
    async fn add_persists_aligned_lists() {
        let (_, store, registry) = setup().await;

        let metadata = registry
            .add_custom_token("0xA2A2A2A2A2A2A2A2A2A2A2A2A2A2A2A2A2A2A2A2")
            .await
            .unwrap();

        assert_eq!(metadata.symbol, "CSTM");
        let raw = store.load(CUSTOM_TOKENS_KEY).await.unwrap().unwrap();
        let list: CustomTokenList = serde_json::from_str(&raw).unwrap();
        assert_eq!(list.tokens, vec!["0xa2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2a2"]);
        assert_eq!(list.added_at.len(), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_duplicate_and_mainstream() {
        let (_, _, registry) = setup().await;

        assert!(matches!(
            registry.add_custom_token("0x1234").await,
            Err(RegistryError::InvalidAddress(_))
        ));
        assert!(matches!(
            registry.add_custom_token(&USDC.to_string()).await,
            Err(RegistryError::Mainstream(_))
        ));

        registry.add_custom_token(&CUSTOM.to_string()).await.unwrap();
        assert!(matches!(
            registry.add_custom_token(&CUSTOM.to_string()).await,
            Err(RegistryError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn rejects_non_erc20() {
        let (_, store, registry) = setup().await;
        let unknown = Address::repeat_byte(0xDD);

        let err = registry.add_custom_token(&unknown.to_string()).await.unwrap_err();

        assert!(matches!(err, RegistryError::NotErc20 { address, .. } if address == unknown));
        assert!(store.load(CUSTOM_TOKENS_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_drops_token_and_cached_pair() {
        let (_, _, registry) = setup().await;
        registry.add_custom_token(&CUSTOM.to_string()).await.unwrap();
        registry.refresh(Some(USER)).await;
        assert!(registry.pair(CUSTOM).await.is_some());

        registry.remove_custom_token(CUSTOM).await.unwrap();

        assert!(registry.custom_tokens().await.unwrap().tokens.is_empty());
        assert!(registry.pair(CUSTOM).await.is_none());
        assert!(matches!(
            registry.remove_custom_token(CUSTOM).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn refresh_resolves_wrappers_and_balances() {
        let (chain, _, registry) = setup().await;
        let wrapper = Address::repeat_byte(0xC1);
        let handle = B256::repeat_byte(0x5A);
        chain.add_wrapper(USDC, wrapper).await;
        chain.set_confidential_handle(wrapper, USER, handle).await;
        registry.add_custom_token(&CUSTOM.to_string()).await.unwrap();

        let pairs = registry.refresh(Some(USER)).await;

        assert_eq!(pairs.len(), 2);
        let usdc = &pairs[0];
        assert!(usdc.is_mainstream && !usdc.is_custom);
        assert_eq!(usdc.erc20_balance, U256::from(1_000));
        assert_eq!(usdc.wrapped_address, Some(wrapper));
        assert_eq!(usdc.wrapped_balance, Some(handle));

        let custom = &pairs[1];
        assert!(custom.is_custom);
        assert!(!custom.has_wrapper());
        assert_eq!(custom.wrapped_balance, None);
    }

    #[tokio::test]
    async fn refresh_without_wallet_reads_no_balances() {
        let (chain, _, registry) = setup().await;

        let pairs = registry.refresh(None).await;

        assert_eq!(pairs[0].erc20_balance, U256::ZERO);
        assert_eq!(chain.call_count("balance_of").await, 0);
    }

    #[tokio::test]
    async fn failing_token_is_skipped() {
        let (chain, _, registry) = setup().await;
        registry.add_custom_token(&CUSTOM.to_string()).await.unwrap();
        chain.fail_next("token_metadata", "rpc timeout").await;

        let pairs = registry.refresh(Some(USER)).await;

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].erc20_address, CUSTOM);
    }

    #[tokio::test]
    async fn corrupt_list_is_reported() {
        let (_, store, registry) = setup().await;
        store.save(CUSTOM_TOKENS_KEY, "{not json".into()).await.unwrap();

        assert!(matches!(
            registry.custom_tokens().await,
            Err(RegistryError::Store(StoreError::Corrupt(_)))
        ));
        // Refresh still shows the curated tokens.
        assert_eq!(registry.refresh(None).await.len(), 1);
    }
}
