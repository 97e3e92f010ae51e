use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// ERC20 metadata read from the token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// An ERC20 token together with its (possibly not yet deployed) confidential wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub erc20_address: Address,
    pub erc20_name: String,
    pub erc20_symbol: String,
    pub erc20_decimals: u8,
    pub erc20_balance: U256,
    /// `None` until the factory has deployed a wrapper for this token.
    pub wrapped_address: Option<Address>,
    /// Encrypted balance handle on the wrapper, when one exists.
    pub wrapped_balance: Option<B256>,
    pub is_mainstream: bool,
    pub is_custom: bool,
}

impl TokenPair {
    pub fn has_wrapper(&self) -> bool {
        self.wrapped_address.is_some()
    }
}

/// Persisted list of user-added tokens.
///
/// Stored as two parallel arrays; every mutation builds a new value so the
/// arrays always stay the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTokenList {
    /// Lowercase `0x`-prefixed addresses.
    pub tokens: Vec<String>,
    /// Milliseconds since the Unix epoch, aligned with `tokens`.
    pub added_at: Vec<i64>,
}

impl CustomTokenList {
    pub fn contains(&self, token: Address) -> bool {
        let key = lowercase_address(token);
        self.tokens.iter().any(|t| *t == key)
    }

    /// Parsed addresses, skipping entries that are not valid hex addresses.
    pub fn addresses(&self) -> Vec<Address> {
        self.tokens.iter().filter_map(|t| t.parse().ok()).collect()
    }

    /// A new list with `token` appended.
    pub fn with_added(&self, token: Address, added_at: i64) -> Self {
        let mut tokens = self.tokens.clone();
        let mut stamps = self.added_at.clone();
        tokens.push(lowercase_address(token));
        stamps.push(added_at);
        Self {
            tokens,
            added_at: stamps,
        }
    }

    /// A new list without `token`. Both arrays lose the same index.
    pub fn with_removed(&self, token: Address) -> Self {
        let key = lowercase_address(token);
        let (tokens, added_at) = self
            .tokens
            .iter()
            .zip(self.added_at.iter())
            .filter(|(t, _)| **t != key)
            .map(|(t, a)| (t.clone(), *a))
            .unzip();
        Self { tokens, added_at }
    }

    /// Whether both arrays have the same length.
    pub fn is_aligned(&self) -> bool {
        self.tokens.len() == self.added_at.len()
    }
}

/// `0x`-prefixed lowercase hex, the key format used for persisted addresses.
pub fn lowercase_address(address: Address) -> String {
    format!("{address:#x}")
}
