pub mod abi;
pub mod ethereum;
pub mod graphql_indexer;
pub mod json_store;
pub mod local_wallet;
pub mod memory_store;
pub mod mock_contracts;
pub mod mock_fhe;
pub mod mock_indexer;
pub mod mock_wallet;
pub mod offline_fhe;
