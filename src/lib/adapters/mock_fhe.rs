use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::eip712_domain;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::ports::fhe::{
    EncryptedInput, EncryptedInputRequest, FheEngine, FheError, FheKeypair, PublicDecryptResults,
    UserDecryptRequest, UserDecryptRequestVerification, UserDecryptTypedData,
};

/// In-process FHE engine for testing and the demo.
///
/// "Ciphertexts" are opaque random-looking handles backed by a lookup table,
/// so anything encrypted here can later be user- or publicly decrypted.
pub struct MockFheEngine {
    ready: AtomicBool,
    values: Mutex<HashMap<B256, U256>>,
    nonce: AtomicU64,
    encrypt_calls: AtomicUsize,
    user_decrypt_calls: AtomicUsize,
    public_decrypt_calls: AtomicUsize,
    fail_public_decrypt: AtomicBool,
    last_user_decrypt: Mutex<Option<UserDecryptRequest>>,
}

impl MockFheEngine {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            values: Mutex::new(HashMap::new()),
            nonce: AtomicU64::new(0),
            encrypt_calls: AtomicUsize::new(0),
            user_decrypt_calls: AtomicUsize::new(0),
            public_decrypt_calls: AtomicUsize::new(0),
            fail_public_decrypt: AtomicBool::new(false),
            last_user_decrypt: Mutex::new(None),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make subsequent public decryptions fail (or succeed again).
    pub fn set_fail_public_decrypt(&self, fail: bool) {
        self.fail_public_decrypt.store(fail, Ordering::SeqCst);
    }

    /// Register a fresh handle that decrypts to `value`.
    pub fn seed_value(&self, value: u64) -> B256 {
        let handle = self.next_handle();
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle, U256::from(value));
        handle
    }

    pub fn encrypt_count(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    pub fn user_decrypt_count(&self) -> usize {
        self.user_decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn public_decrypt_count(&self) -> usize {
        self.public_decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn last_user_decrypt(&self) -> Option<UserDecryptRequest> {
        self.last_user_decrypt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_handle(&self) -> B256 {
        let n = self.nonce.fetch_add(1, Ordering::SeqCst);
        keccak256(n.to_be_bytes())
    }

    fn lookup(&self, handle: &B256) -> Option<U256> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(handle)
            .copied()
    }
}

impl Default for MockFheEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FheEngine for MockFheEngine {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn encrypt(&self, request: &EncryptedInputRequest) -> Result<EncryptedInput, FheError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_ready() {
            return Err(FheError::NotInitialized);
        }

        let handles: Vec<B256> = request
            .values
            .iter()
            .map(|value| {
                let handle = self.next_handle();
                self.values
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(handle, U256::from(*value));
                handle
            })
            .collect();

        // Proof binds the handles to the target contract and user.
        let mut preimage = Vec::with_capacity(40 + handles.len() * 32);
        preimage.extend_from_slice(request.contract.as_slice());
        preimage.extend_from_slice(request.user.as_slice());
        for handle in &handles {
            preimage.extend_from_slice(handle.as_slice());
        }
        let input_proof = Bytes::copy_from_slice(keccak256(&preimage).as_slice());

        Ok(EncryptedInput { handles, input_proof })
    }

    async fn generate_keypair(&self) -> Result<FheKeypair, FheError> {
        let seed = self.next_handle();
        Ok(FheKeypair {
            public_key: Bytes::copy_from_slice(keccak256(seed).as_slice()),
            private_key: Bytes::copy_from_slice(seed.as_slice()),
        })
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
                chain_id: 11155111,
                verifying_contract: Address::ZERO,
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
        request: &UserDecryptRequest,
    ) -> Result<HashMap<B256, U256>, FheError> {
        self.user_decrypt_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_user_decrypt
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(request.clone());

        if request.signature.is_empty() {
            return Err(FheError::Decryption("missing signature".into()));
        }

        request
            .pairs
            .iter()
            .map(|pair| {
                self.lookup(&pair.handle)
                    .map(|value| (pair.handle, value))
                    .ok_or_else(|| FheError::Decryption(format!("unknown handle {}", pair.handle)))
            })
            .collect()
    }

    async fn public_decrypt(&self, handles: &[B256]) -> Result<PublicDecryptResults, FheError> {
        self.public_decrypt_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_public_decrypt.load(Ordering::SeqCst) {
            return Err(FheError::Relayer("public decryption unavailable".into()));
        }

        let mut clear_values = HashMap::new();
        let mut preimage = Vec::new();
        for handle in handles {
            let value = self
                .lookup(handle)
                .ok_or_else(|| FheError::Decryption(format!("unknown handle {handle}")))?;
            clear_values.insert(*handle, value);
            preimage.extend_from_slice(handle.as_slice());
        }

        Ok(PublicDecryptResults {
            clear_values,
            decryption_proof: Bytes::copy_from_slice(keccak256(&preimage).as_slice()),
        })
    }
}
