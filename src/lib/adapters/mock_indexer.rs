use alloy::primitives::{Address, B256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::domain::unwrap::UnwrapRequest;
use crate::ports::indexer::{IndexerError, IndexerPort, UnwrapRequestFilter};

/// Indexer double for testing.
///
/// Requests can be staged to appear only from the N-th query on, which models
/// the indexer ingesting a burn some time after its transaction confirmed.
pub struct MockIndexer {
    requests: Mutex<Vec<UnwrapRequest>>,
    staged: Mutex<Vec<(usize, UnwrapRequest)>>,
    queries: AtomicUsize,
    unavailable: AtomicBool,
}

impl MockIndexer {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub async fn insert(&self, request: UnwrapRequest) {
        self.requests.lock().await.push(request);
    }

    /// Make `request` visible starting with query number `from_query` (1-based).
    pub async fn stage(&self, from_query: usize, request: UnwrapRequest) {
        self.staged.lock().await.push((from_query, request));
    }

    /// Mark a request finalized, as the indexer would after a finalize event.
    pub async fn mark_finalized(&self, burnt_amount: B256, cleartext: u64) {
        let mut requests = self.requests.lock().await;
        if let Some(r) = requests.iter_mut().find(|r| r.burnt_amount == burnt_amount) {
            r.is_finalized = true;
            r.cleartext_amount = Some(cleartext);
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

/// A not-yet-finalized request as the indexer reports it right after a burn.
pub fn pending_request(
    recipient: Address,
    token: Address,
    burnt_amount: B256,
    tx_hash: B256,
    timestamp: u64,
) -> UnwrapRequest {
    UnwrapRequest {
        id: format!("{tx_hash:#x}-0"),
        burnt_amount,
        recipient,
        request_block_number: timestamp / 12,
        request_transaction_hash: tx_hash,
        request_timestamp: timestamp,
        is_finalized: false,
        cleartext_amount: None,
        finalized_block_number: None,
        finalized_transaction_hash: None,
        finalized_timestamp: None,
        token_address: token,
        token_name: "Confidential Token".into(),
        token_symbol: "cTKN".into(),
    }
}

impl Default for MockIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerPort for MockIndexer {
    async fn unwrap_requests(
        &self,
        filter: &UnwrapRequestFilter,
    ) -> Result<Vec<UnwrapRequest>, IndexerError> {
        let query = self.queries.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexerError::Unavailable("connection refused".into()));
        }

        let mut requests = self.requests.lock().await;
        {
            let mut staged = self.staged.lock().await;
            let (ready, waiting): (Vec<_>, Vec<_>) =
                staged.drain(..).partition(|(from, _)| *from <= query);
            *staged = waiting;
            requests.extend(ready.into_iter().map(|(_, r)| r));
        }

        let mut matching: Vec<UnwrapRequest> = requests
            .iter()
            .filter(|r| {
                r.recipient == filter.recipient
                    && r.token_address == filter.token_address
                    && r.is_finalized == filter.is_finalized
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.request_timestamp.cmp(&a.request_timestamp));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: Address = Address::repeat_byte(0x11);
    const WRAPPER: Address = Address::repeat_byte(0xC1);

    fn filter() -> UnwrapRequestFilter {
        UnwrapRequestFilter {
            recipient: USER,
            token_address: WRAPPER,
            is_finalized: false,
        }
    }

    #[tokio::test]
    async fn staged_request_appears_on_its_query() {
        let indexer = MockIndexer::new();
        let request = pending_request(USER, WRAPPER, B256::repeat_byte(1), B256::repeat_byte(2), 10);
        indexer.stage(2, request.clone()).await;

        assert!(indexer.unwrap_requests(&filter()).await.unwrap().is_empty());
        assert_eq!(indexer.unwrap_requests(&filter()).await.unwrap(), vec![request]);
        assert_eq!(indexer.query_count(), 2);
    }

    #[tokio::test]
    async fn results_are_newest_first_and_filtered() {
        let indexer = MockIndexer::new();
        indexer
            .insert(pending_request(USER, WRAPPER, B256::repeat_byte(1), B256::repeat_byte(1), 10))
            .await;
        indexer
            .insert(pending_request(USER, WRAPPER, B256::repeat_byte(2), B256::repeat_byte(2), 20))
            .await;
        indexer
            .insert(pending_request(USER, Address::repeat_byte(0xEE), B256::repeat_byte(3), B256::repeat_byte(3), 30))
            .await;
        indexer.mark_finalized(B256::repeat_byte(1), 5).await;

        let found = indexer.unwrap_requests(&filter()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].burnt_amount, B256::repeat_byte(2));
    }
}
