use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::Utc;
use tracing::debug;

use crate::errors::CryptoError;
use crate::ports::fhe::{EncryptedInputRequest, FheEngine, FheError, HandleContractPair, UserDecryptRequest};
use crate::ports::wallet::{WalletError, WalletPort};

/// Validity window of a user-decryption authorization.
pub const USER_DECRYPT_DURATION_DAYS: u64 = 10;

/// An encrypted 64-bit amount and the proof the contract verifies it against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedAmount {
    pub handle: B256,
    pub proof: Bytes,
}

/// A publicly decrypted amount and its verifiable proof bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicDecryption {
    pub cleartext_amount: u64,
    pub proof: Bytes,
}

/// Thin adapter over the FHE engine exposing the three operations the
/// orchestration layer needs.
pub struct FheAdapter<E: FheEngine> {
    engine: Arc<E>,
}

impl<E: FheEngine> Clone for FheAdapter<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: FheEngine> FheAdapter<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_ready()
    }

    fn ensure_ready(&self) -> Result<(), CryptoError> {
        if self.engine.is_ready() {
            Ok(())
        } else {
            Err(CryptoError::EngineNotReady)
        }
    }

    /// Encrypt `value` as a single 64-bit input bound to `contract` and `user`.
    pub async fn encrypt_amount(
        &self,
        contract: Address,
        user: Address,
        value: u64,
    ) -> Result<EncryptedAmount, CryptoError> {
        if !self.engine.is_ready() {
            return Err(CryptoError::Encryption("FHE engine not initialized".into()));
        }

        let request = EncryptedInputRequest::new(contract, user).add_u64(value);
        let input = self
            .engine
            .encrypt(&request)
            .await
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let handle = input
            .handles
            .first()
            .copied()
            .ok_or_else(|| CryptoError::Encryption("engine returned no handle".into()))?;

        Ok(EncryptedAmount {
            handle,
            proof: input.input_proof,
        })
    }

    /// Decrypt a handle owned by `contract` on behalf of the signing user.
    ///
    /// Runs the full authorization round: fresh keypair, typed message scoped
    /// to `contract` and a [`USER_DECRYPT_DURATION_DAYS`] window starting now,
    /// user signature, then the relayer request.
    pub async fn decrypt_for_user<W: WalletPort>(
        &self,
        handle: B256,
        contract: Address,
        signer: &W,
    ) -> Result<u64, CryptoError> {
        self.ensure_ready()?;
        let user = signer
            .address()
            .ok_or_else(|| CryptoError::Decryption(WalletError::NotConnected.to_string()))?;

        let keypair = self.engine.generate_keypair().await.map_err(decryption_error)?;
        let start_timestamp = Utc::now().timestamp().max(0) as u64;
        let contract_addresses = vec![contract];

        let typed_data = self.engine.create_eip712(
            &keypair.public_key,
            &contract_addresses,
            start_timestamp,
            USER_DECRYPT_DURATION_DAYS,
        );

        let signature = signer.sign_typed_data(&typed_data).await.map_err(|e| match e {
            WalletError::Rejected(reason) => CryptoError::SignatureRejected(reason),
            other => CryptoError::Decryption(other.to_string()),
        })?;
        debug!(%contract, %user, "user decryption authorized");

        let request = UserDecryptRequest {
            pairs: vec![HandleContractPair { handle, contract }],
            keypair,
            signature,
            contract_addresses,
            user,
            start_timestamp,
            duration_days: USER_DECRYPT_DURATION_DAYS,
        };

        let values = self.engine.user_decrypt(&request).await.map_err(decryption_error)?;
        let value = values
            .get(&handle)
            .copied()
            .ok_or_else(|| CryptoError::Decryption(format!("no cleartext returned for {handle}")))?;
        to_u64(value)
    }

    /// Publicly decrypt a handle the protocol has marked as publicly decryptable.
    pub async fn decrypt_publicly(&self, handle: B256) -> Result<PublicDecryption, CryptoError> {
        self.ensure_ready()?;

        let results = self
            .engine
            .public_decrypt(&[handle])
            .await
            .map_err(decryption_error)?;

        let value = results
            .clear_values
            .get(&handle)
            .copied()
            .ok_or_else(|| CryptoError::Decryption(format!("no cleartext returned for {handle}")))?;

        Ok(PublicDecryption {
            cleartext_amount: to_u64(value)?,
            proof: results.decryption_proof,
        })
    }
}

fn decryption_error(err: FheError) -> CryptoError {
    match err {
        FheError::NotInitialized => CryptoError::EngineNotReady,
        other => CryptoError::Decryption(other.to_string()),
    }
}

fn to_u64(value: U256) -> Result<u64, CryptoError> {
    u64::try_from(value).map_err(|_| CryptoError::Decryption(format!("cleartext {value} exceeds 64 bits")))
}
