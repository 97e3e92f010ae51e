use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::eip712_domain;
use std::collections::HashMap;

use crate::ports::fhe::{
    EncryptedInput, EncryptedInputRequest, FheEngine, FheError, FheKeypair, PublicDecryptResults,
    UserDecryptRequest, UserDecryptRequestVerification, UserDecryptTypedData,
};

/// Engine used when no FHE backend is configured.
///
/// Never reports ready, so every privacy gate lists the engine as missing and
/// no encrypt/decrypt call is attempted. Wrapping, which needs no FHE, still works.
pub struct OfflineFheEngine {
    chain_id: u64,
}

impl OfflineFheEngine {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }
}

impl FheEngine for OfflineFheEngine {
    fn is_ready(&self) -> bool {
        false
    }

    async fn encrypt(&self, _request: &EncryptedInputRequest) -> Result<EncryptedInput, FheError> {
        Err(FheError::NotInitialized)
    }

    async fn generate_keypair(&self) -> Result<FheKeypair, FheError> {
        Err(FheError::NotInitialized)
    }

    fn create_eip712(
        &self,
        public_key: &Bytes,
        contract_addresses: &[Address],
        start_timestamp: u64,
        duration_days: u64,
    ) -> UserDecryptTypedData {
        UserDecryptTypedData {
            domain: eip712_domain! {
                name: "Decryption",
                version: "1",
                chain_id: self.chain_id,
            },
            message: UserDecryptRequestVerification {
                publicKey: public_key.clone(),
                contractAddresses: contract_addresses.to_vec(),
                startTimestamp: U256::from(start_timestamp),
                durationDays: U256::from(duration_days),
                extraData: Bytes::new(),
            },
        }
    }

    async fn user_decrypt(
        &self,
        _request: &UserDecryptRequest,
    ) -> Result<HashMap<B256, U256>, FheError> {
        Err(FheError::NotInitialized)
    }

    async fn public_decrypt(&self, _handles: &[B256]) -> Result<PublicDecryptResults, FheError> {
        Err(FheError::NotInitialized)
    }
}
