use alloy::primitives::Address;
use std::future::Future;

use crate::domain::unwrap::UnwrapRequest;

/// Filter sent to the event indexer. Matches the read-only query shape
/// `{recipient, isFinalized, tokenAddress}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwrapRequestFilter {
    pub recipient: Address,
    pub token_address: Address,
    pub is_finalized: bool,
}

/// Port for the event indexer that records unwrap burn/finalize events.
///
/// Implementations:
/// - `GraphqlIndexer` (reqwest)
/// - `MockIndexer` for testing
pub trait IndexerPort: Send + Sync {
    /// Unwrap requests matching `filter`, newest first.
    fn unwrap_requests(
        &self,
        filter: &UnwrapRequestFilter,
    ) -> impl Future<Output = Result<Vec<UnwrapRequest>, IndexerError>> + Send;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexerError {
    #[error("indexer unavailable: {0}")]
    Unavailable(String),

    #[error("indexer query failed: {0}")]
    Query(String),

    #[error("invalid indexer response: {0}")]
    InvalidResponse(String),
}
