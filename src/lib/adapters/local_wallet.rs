use alloy::primitives::{Address, Bytes};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol_types::SolStruct;

use crate::ports::fhe::UserDecryptTypedData;
use crate::ports::wallet::{WalletError, WalletPort};

/// Wallet backed by a local private key. Without a key it behaves as a
/// disconnected wallet.
pub struct LocalWallet {
    signer: Option<PrivateKeySigner>,
}

impl LocalWallet {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self {
            signer: Some(signer),
        }
    }

    pub fn disconnected() -> Self {
        Self { signer: None }
    }

    /// Parse a hex private key.
    pub fn from_private_key(private_key: &str) -> Result<Self, WalletError> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| WalletError::Signing(format!("invalid private key: {e}")))?;
        Ok(Self::new(signer))
    }
}

impl WalletPort for LocalWallet {
    fn address(&self) -> Option<Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    fn is_signer_ready(&self) -> bool {
        self.signer.is_some()
    }

    async fn sign_typed_data(&self, typed_data: &UserDecryptTypedData) -> Result<Bytes, WalletError> {
        let signer = self.signer.as_ref().ok_or(WalletError::NotConnected)?;
        let hash = typed_data.message.eip712_signing_hash(&typed_data.domain);
        let signature = signer
            .sign_hash(&hash)
            .await
            .map_err(|e| WalletError::Signing(e.to_string()))?;
        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::offline_fhe::OfflineFheEngine;
    use crate::ports::fhe::FheEngine;

    #[tokio::test]
    async fn signs_typed_data_with_recoverable_signature() {
        let signer = PrivateKeySigner::random();
        let expected = signer.address();
        let wallet = LocalWallet::new(signer);

        let typed = OfflineFheEngine::new(1).create_eip712(
            &Bytes::from_static(&[1, 2, 3]),
            &[Address::repeat_byte(0x22)],
            1_700_000_000,
            10,
        );
        let sig = wallet.sign_typed_data(&typed).await.unwrap();
        assert_eq!(sig.len(), 65);

        let parsed = alloy::primitives::Signature::try_from(sig.as_ref()).unwrap();
        let hash = typed.message.eip712_signing_hash(&typed.domain);
        assert_eq!(parsed.recover_address_from_prehash(&hash).unwrap(), expected);
    }

    #[tokio::test]
    async fn disconnected_wallet_cannot_sign() {
        let wallet = LocalWallet::disconnected();
        assert!(wallet.address().is_none());
        assert!(!wallet.is_signer_ready());

        let typed = OfflineFheEngine::new(1).create_eip712(&Bytes::new(), &[], 0, 10);
        assert!(matches!(
            wallet.sign_typed_data(&typed).await,
            Err(WalletError::NotConnected)
        ));
    }
}
