use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::Eip712Domain;
use std::collections::HashMap;
use std::future::Future;

sol! {
    /// Typed message a user signs to authorize decryption of their handles.
    #[derive(Debug, PartialEq, Eq)]
    struct UserDecryptRequestVerification {
        bytes publicKey;
        address[] contractAddresses;
        uint256 startTimestamp;
        uint256 durationDays;
        bytes extraData;
    }
}

/// Builder for a batch of encrypted inputs bound to one contract and one user.
///
/// Mirrors the engine's `createEncryptedInput(contract, user).add64(v)` call chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInputRequest {
    pub contract: Address,
    pub user: Address,
    pub values: Vec<u64>,
}

impl EncryptedInputRequest {
    pub fn new(contract: Address, user: Address) -> Self {
        Self {
            contract,
            user,
            values: Vec::new(),
        }
    }

    /// Append a 64-bit value to encrypt.
    pub fn add_u64(mut self, value: u64) -> Self {
        self.values.push(value);
        self
    }
}

/// Engine output for an [`EncryptedInputRequest`]: one handle per value plus
/// a single proof covering all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    pub handles: Vec<B256>,
    pub input_proof: Bytes,
}

/// Ephemeral keypair used for one user-decryption round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FheKeypair {
    pub public_key: Bytes,
    pub private_key: Bytes,
}

/// EIP-712 domain and message the wallet signs to authorize user decryption.
#[derive(Debug, Clone)]
pub struct UserDecryptTypedData {
    pub domain: Eip712Domain,
    pub message: UserDecryptRequestVerification,
}

/// A handle together with the contract that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleContractPair {
    pub handle: B256,
    pub contract: Address,
}

/// Signed request submitted to the engine to retrieve cleartexts.
#[derive(Debug, Clone)]
pub struct UserDecryptRequest {
    pub pairs: Vec<HandleContractPair>,
    pub keypair: FheKeypair,
    pub signature: Bytes,
    pub contract_addresses: Vec<Address>,
    pub user: Address,
    pub start_timestamp: u64,
    pub duration_days: u64,
}

/// Cleartexts of publicly decryptable handles with the proof the contract verifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicDecryptResults {
    pub clear_values: HashMap<B256, U256>,
    pub decryption_proof: Bytes,
}

/// Port for the FHE engine (encryption library + decryption relayer).
///
/// Implementations:
/// - `OfflineFheEngine` (no engine configured; never ready)
/// - `MockFheEngine` for testing
pub trait FheEngine: Send + Sync {
    /// Whether the engine instance has finished initializing.
    fn is_ready(&self) -> bool;

    fn encrypt(
        &self,
        request: &EncryptedInputRequest,
    ) -> impl Future<Output = Result<EncryptedInput, FheError>> + Send;

    fn generate_keypair(&self) -> impl Future<Output = Result<FheKeypair, FheError>> + Send;

    /// Build the typed authorization message for a decryption window.
    fn create_eip712(
        &self,
        public_key: &Bytes,
        contract_addresses: &[Address],
        start_timestamp: u64,
        duration_days: u64,
    ) -> UserDecryptTypedData;

    fn user_decrypt(
        &self,
        request: &UserDecryptRequest,
    ) -> impl Future<Output = Result<HashMap<B256, U256>, FheError>> + Send;

    fn public_decrypt(
        &self,
        handles: &[B256],
    ) -> impl Future<Output = Result<PublicDecryptResults, FheError>> + Send;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FheError {
    #[error("FHE engine not initialized")]
    NotInitialized,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("relayer error: {0}")]
    Relayer(String),
}
