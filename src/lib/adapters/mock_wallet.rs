use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolStruct;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::ports::fhe::UserDecryptTypedData;
use crate::ports::wallet::{WalletError, WalletPort};

/// Scriptable wallet for testing: can be disconnected, left uninitialized,
/// or told to reject signature prompts.
pub struct MockWallet {
    address: Mutex<Option<Address>>,
    signer_ready: AtomicBool,
    reject: AtomicBool,
    signatures: AtomicUsize,
}

impl MockWallet {
    pub fn connected(address: Address) -> Self {
        Self {
            address: Mutex::new(Some(address)),
            signer_ready: AtomicBool::new(true),
            reject: AtomicBool::new(false),
            signatures: AtomicUsize::new(0),
        }
    }

    pub fn disconnected() -> Self {
        let wallet = Self::connected(Address::ZERO);
        wallet.set_address(None);
        wallet.set_signer_ready(false);
        wallet
    }

    pub fn set_address(&self, address: Option<Address>) {
        *self.address.lock().unwrap_or_else(|e| e.into_inner()) = address;
    }

    pub fn set_signer_ready(&self, ready: bool) {
        self.signer_ready.store(ready, Ordering::SeqCst);
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

impl WalletPort for MockWallet {
    fn address(&self) -> Option<Address> {
        *self.address.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_signer_ready(&self) -> bool {
        self.signer_ready.load(Ordering::SeqCst)
    }

    async fn sign_typed_data(&self, typed_data: &UserDecryptTypedData) -> Result<Bytes, WalletError> {
        if self.address().is_none() {
            return Err(WalletError::NotConnected);
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(WalletError::Rejected("user denied message signature".into()));
        }
        self.signatures.fetch_add(1, Ordering::SeqCst);

        // Not a real ECDSA signature; the mock engine only checks presence.
        let hash = typed_data.message.eip712_signing_hash(&typed_data.domain);
        Ok(Bytes::copy_from_slice(hash.as_slice()))
    }
}
