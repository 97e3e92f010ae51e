use alloy::primitives::B256;
use chrono::{DateTime, Utc};

/// Canonical "empty ciphertext" handle. A balance that was never written
/// reads back as this value and is never sent for decryption.
pub const ZERO_HANDLE: B256 = B256::ZERO;

/// Whether `handle` is the uninitialized-balance sentinel.
pub fn is_zero_handle(handle: &B256) -> bool {
    *handle == ZERO_HANDLE
}

/// Cached confidential balance of one wrapped token for the connected wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBalanceState {
    /// Ciphertext handle read in the last completed fetch.
    pub encrypted_handle: Option<B256>,
    /// Cleartext of `encrypted_handle`, produced in the same fetch.
    pub decrypted_value: Option<u64>,
    /// True between fetch start and fetch settle.
    pub is_decrypting: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TokenBalanceState {
    /// The decrypted balance, only when it can be shown as current.
    ///
    /// A value left over from a fetch that was followed by a failure is not
    /// authoritative and must be rendered masked.
    pub fn authoritative_value(&self) -> Option<u64> {
        match self.error {
            Some(_) => None,
            None => self.decrypted_value,
        }
    }

    pub fn has_decrypted(&self) -> bool {
        self.authoritative_value().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_unknown() {
        let state = TokenBalanceState::default();
        assert!(state.encrypted_handle.is_none());
        assert!(state.decrypted_value.is_none());
        assert!(!state.is_decrypting);
        assert!(!state.has_decrypted());
    }

    #[test]
    fn error_masks_previous_value() {
        let state = TokenBalanceState {
            decrypted_value: Some(42),
            error: Some("signature rejected".into()),
            ..Default::default()
        };
        assert_eq!(state.authoritative_value(), None);
    }

    #[test]
    fn zero_sentinel_is_32_bytes() {
        assert_eq!(ZERO_HANDLE.len(), 32);
        assert!(is_zero_handle(&B256::ZERO));
        assert!(!is_zero_handle(&B256::repeat_byte(0x01)));
    }
}
