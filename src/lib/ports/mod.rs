pub mod contracts;
pub mod fhe;
pub mod indexer;
pub mod storage;
pub mod wallet;

use alloy::primitives::B256;

/// Receipt of a confirmed transaction.
///
/// Write methods on [`contracts::ContractPort`] only return once the
/// transaction has been mined, so holding a receipt means the on-chain state
/// change is observable to subsequent reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub success: bool,
}
