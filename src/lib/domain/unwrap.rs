use alloy::primitives::{Address, Bytes, B256};

/// An unwrap request as reported by the event indexer.
///
/// `burnt_amount` is the ciphertext handle of the burned amount and is unique
/// per burn, so it serves as the request's natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrapRequest {
    pub id: String,
    pub burnt_amount: B256,
    pub recipient: Address,
    pub request_block_number: u64,
    pub request_transaction_hash: B256,
    pub request_timestamp: u64,
    pub is_finalized: bool,
    /// Set by the indexer once the finalize event has been seen.
    pub cleartext_amount: Option<u64>,
    pub finalized_block_number: Option<u64>,
    pub finalized_transaction_hash: Option<B256>,
    pub finalized_timestamp: Option<u64>,
    pub token_address: Address,
    pub token_name: String,
    pub token_symbol: String,
}

/// Outcome of publicly decrypting one request's `burnt_amount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionResult {
    Loading,
    Error { message: String },
    Success { cleartext_amount: u64, proof: Bytes },
}

impl DecryptionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DecryptionResult::Success { .. })
    }
}

/// A pending request paired with the best known cleartext amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUnwrap {
    pub request: UnwrapRequest,
    /// Indexer-reported cleartext if present, otherwise a cached public decryption.
    pub amount: Option<u64>,
}
