//! Per-token cache of encrypted and decrypted confidential balances.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::balance::{is_zero_handle, TokenBalanceState};
use crate::encryption::FheAdapter;
use crate::ports::contracts::ContractPort;
use crate::ports::fhe::FheEngine;
use crate::ports::wallet::WalletPort;
use crate::requirements::{evaluate, DecryptionRequirements};

#[derive(Default)]
struct Slot {
    state: TokenBalanceState,
    /// Ticket of the fetch currently in flight, if any.
    ticket: Option<u64>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Address, Slot>,
    /// Wallet the cached entries belong to.
    wallet: Option<Address>,
    next_ticket: u64,
}

impl Inner {
    /// Drop every entry if the connected wallet is not the one the cache was built for.
    fn sync_wallet(&mut self, wallet: Option<Address>) {
        if self.wallet != wallet {
            if !self.entries.is_empty() {
                info!(old = ?self.wallet, new = ?wallet, "wallet changed, clearing balances");
            }
            self.entries.clear();
            self.wallet = wallet;
        }
    }
}

/// Confidential balance store keyed by wrapper address.
///
/// Entries are only ever replaced whole, never patched field by field, so a
/// reader can never see a decrypted value paired with a different handle.
/// The `is_decrypting` flag of an entry is the single-flight guard for that
/// token; different tokens fetch independently.
pub struct ConfidentialBalanceStore<C: ContractPort, E: FheEngine, W: WalletPort> {
    contracts: Arc<C>,
    fhe: FheAdapter<E>,
    wallet: Arc<W>,
    inner: Mutex<Inner>,
}

impl<C: ContractPort, E: FheEngine, W: WalletPort> ConfidentialBalanceStore<C, E, W> {
    pub fn new(contracts: Arc<C>, fhe: FheAdapter<E>, wallet: Arc<W>) -> Self {
        let connected = wallet.address();
        Self {
            contracts,
            fhe,
            wallet,
            inner: Mutex::new(Inner {
                wallet: connected,
                ..Default::default()
            }),
        }
    }

    /// Current decryption readiness, recomputed from the live signals.
    pub fn requirements(&self) -> DecryptionRequirements {
        evaluate(
            self.wallet.address().is_some(),
            self.fhe.is_ready(),
            self.wallet.is_signer_ready(),
        )
    }

    /// Cached state for `token`, or the default unknown state.
    pub async fn get_state(&self, token: Address) -> TokenBalanceState {
        self.inner
            .lock()
            .await
            .entries
            .get(&token)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    /// Read the current balance handle of `token` and decrypt it.
    ///
    /// Never fails: errors are recorded on the entry. A call made while a
    /// fetch for the same token is in flight is ignored.
    pub async fn fetch_and_decrypt(&self, token: Address) {
        let requirements = self.requirements();
        let owner = match (requirements.can_decrypt, self.wallet.address()) {
            (true, Some(owner)) => owner,
            _ => {
                let message = requirements
                    .missing_message
                    .unwrap_or_else(|| "wallet not connected".into());
                let mut inner = self.inner.lock().await;
                inner.sync_wallet(self.wallet.address());
                let slot = inner.entries.entry(token).or_default();
                if slot.state.is_decrypting {
                    return;
                }
                debug!(%token, %message, "balance fetch blocked by requirements");
                slot.state = TokenBalanceState {
                    is_decrypting: false,
                    error: Some(message),
                    ..slot.state.clone()
                };
                return;
            }
        };

        let ticket = {
            let mut inner = self.inner.lock().await;
            inner.sync_wallet(Some(owner));
            inner.next_ticket += 1;
            let ticket = inner.next_ticket;

            let slot = inner.entries.entry(token).or_default();
            if slot.state.is_decrypting {
                debug!(%token, "balance fetch already in flight, ignoring");
                return;
            }
            slot.state = TokenBalanceState {
                is_decrypting: true,
                error: None,
                ..slot.state.clone()
            };
            slot.ticket = Some(ticket);
            ticket
        };

        let outcome = self.read_and_decrypt(token, owner).await;

        let mut inner = self.inner.lock().await;
        let same_wallet = inner.wallet == Some(owner);
        let Some(slot) = inner.entries.get_mut(&token) else {
            debug!(%token, "balance cleared while fetching, discarding result");
            return;
        };
        if !same_wallet || slot.ticket != Some(ticket) {
            debug!(%token, "stale balance fetch, discarding result");
            return;
        }

        slot.ticket = None;
        slot.state = match outcome {
            Ok((handle, value)) => {
                debug!(%token, "balance decrypted");
                TokenBalanceState {
                    encrypted_handle: Some(handle),
                    decrypted_value: Some(value),
                    is_decrypting: false,
                    last_fetched_at: Some(Utc::now()),
                    error: None,
                }
            }
            Err(message) => {
                warn!(%token, %message, "balance fetch failed");
                TokenBalanceState {
                    is_decrypting: false,
                    error: Some(message),
                    ..slot.state.clone()
                }
            }
        };
    }

    async fn read_and_decrypt(&self, token: Address, owner: Address) -> Result<(B256, u64), String> {
        let handle = self
            .contracts
            .confidential_balance_of(token, owner)
            .await
            .map_err(|e| e.to_string())?;

        // The empty ciphertext is not decryptable; it means a zero balance.
        if is_zero_handle(&handle) {
            return Ok((handle, 0));
        }

        let value = self
            .fhe
            .decrypt_for_user(handle, token, self.wallet.as_ref())
            .await
            .map_err(|e| e.to_string())?;
        Ok((handle, value))
    }

    /// Remove the entry for `token`. Called after every operation that can
    /// change its on-chain balance.
    pub async fn clear_balance(&self, token: Address) {
        if self.inner.lock().await.entries.remove(&token).is_some() {
            debug!(%token, "balance cleared");
        }
    }

    pub async fn clear_all(&self) {
        self.inner.lock().await.entries.clear();
    }

    /// React to the connected account changing (including disconnect).
    pub async fn on_wallet_changed(&self, wallet: Option<Address>) {
        self.inner.lock().await.sync_wallet(wallet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_contracts::MockContracts;
    use crate::adapters::mock_fhe::MockFheEngine;
    use crate::adapters::mock_wallet::MockWallet;
    use crate::requirements::{ENGINE_LABEL, SIGNER_LABEL};

    const USER: Address = Address::repeat_byte(0x11);
    const WRAPPER: Address = Address::repeat_byte(0xC1);

    struct Fixture {
        chain: Arc<MockContracts>,
        engine: Arc<MockFheEngine>,
        wallet: Arc<MockWallet>,
        store: ConfidentialBalanceStore<MockContracts, MockFheEngine, MockWallet>,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(MockContracts::new(USER));
        let engine = Arc::new(MockFheEngine::new());
        let wallet = Arc::new(MockWallet::connected(USER));
        let store = ConfidentialBalanceStore::new(
            Arc::clone(&chain),
            FheAdapter::new(Arc::clone(&engine)),
            Arc::clone(&wallet),
        );
        Fixture {
            chain,
            engine,
            wallet,
            store,
        }
    }

    #[tokio::test]
    async fn unknown_token_has_default_state() {
        let f = fixture();
        assert_eq!(f.store.get_state(WRAPPER).await, TokenBalanceState::default());
    }

    #[tokio::test]
    async fn fetch_decrypts_current_handle() {
        let f = fixture();
        let handle = f.engine.seed_value(250);
        f.chain.set_confidential_handle(WRAPPER, USER, handle).await;

        f.store.fetch_and_decrypt(WRAPPER).await;

        let state = f.store.get_state(WRAPPER).await;
        assert_eq!(state.encrypted_handle, Some(handle));
        assert_eq!(state.decrypted_value, Some(250));
        assert!(!state.is_decrypting);
        assert!(state.last_fetched_at.is_some());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn zero_handle_skips_decryption() {
        let f = fixture();

        f.store.fetch_and_decrypt(WRAPPER).await;

        let state = f.store.get_state(WRAPPER).await;
        assert_eq!(state.decrypted_value, Some(0));
        assert_eq!(state.encrypted_handle, Some(B256::ZERO));
        assert_eq!(f.engine.user_decrypt_count(), 0);
        assert_eq!(f.wallet.signature_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_fetch_is_single_flight() {
        let f = fixture();
        let handle = f.engine.seed_value(9);
        f.chain.set_confidential_handle(WRAPPER, USER, handle).await;

        tokio::join!(
            f.store.fetch_and_decrypt(WRAPPER),
            f.store.fetch_and_decrypt(WRAPPER),
        );

        assert_eq!(f.chain.call_count("confidential_balance_of").await, 1);
        assert_eq!(f.engine.user_decrypt_count(), 1);
        assert_eq!(f.store.get_state(WRAPPER).await.decrypted_value, Some(9));
    }

    #[tokio::test]
    async fn different_tokens_fetch_independently() {
        let f = fixture();
        let other = Address::repeat_byte(0xC2);

        tokio::join!(
            f.store.fetch_and_decrypt(WRAPPER),
            f.store.fetch_and_decrypt(other),
        );

        assert_eq!(f.chain.call_count("confidential_balance_of").await, 2);
    }

    #[tokio::test]
    async fn unmet_requirements_record_error_without_network() {
        let f = fixture();
        f.engine.set_ready(false);
        f.wallet.set_signer_ready(false);

        f.store.fetch_and_decrypt(WRAPPER).await;

        let state = f.store.get_state(WRAPPER).await;
        assert_eq!(
            state.error,
            Some(format!("{ENGINE_LABEL}, {SIGNER_LABEL}"))
        );
        assert!(!state.is_decrypting);
        assert_eq!(f.chain.call_count("confidential_balance_of").await, 0);
    }

    #[tokio::test]
    async fn failure_keeps_previous_value_but_masks_it() {
        let f = fixture();
        let handle = f.engine.seed_value(40);
        f.chain.set_confidential_handle(WRAPPER, USER, handle).await;
        f.store.fetch_and_decrypt(WRAPPER).await;

        f.wallet.set_reject(true);
        let next = f.engine.seed_value(41);
        f.chain.set_confidential_handle(WRAPPER, USER, next).await;
        f.store.fetch_and_decrypt(WRAPPER).await;

        let state = f.store.get_state(WRAPPER).await;
        assert_eq!(state.decrypted_value, Some(40));
        assert_eq!(state.encrypted_handle, Some(handle));
        assert!(state.error.as_deref().unwrap().contains("signature rejected"));
        assert_eq!(state.authoritative_value(), None);
    }

    #[tokio::test]
    async fn read_failure_is_recorded() {
        let f = fixture();
        f.chain.fail_next("confidential_balance_of", "rpc down").await;

        f.store.fetch_and_decrypt(WRAPPER).await;

        let state = f.store.get_state(WRAPPER).await;
        assert!(state.error.as_deref().unwrap().contains("rpc down"));
        assert!(!state.is_decrypting);
    }

    #[tokio::test]
    async fn clear_removes_entry() {
        let f = fixture();
        f.store.fetch_and_decrypt(WRAPPER).await;
        f.store.clear_balance(WRAPPER).await;
        assert_eq!(f.store.get_state(WRAPPER).await, TokenBalanceState::default());
    }

    #[tokio::test]
    async fn clear_during_fetch_discards_result() {
        let f = fixture();
        let handle = f.engine.seed_value(70);
        f.chain.set_confidential_handle(WRAPPER, USER, handle).await;

        tokio::join!(f.store.fetch_and_decrypt(WRAPPER), f.store.clear_balance(WRAPPER));

        assert_eq!(f.store.get_state(WRAPPER).await.decrypted_value, None);
    }

    #[tokio::test]
    async fn wallet_change_clears_everything() {
        let f = fixture();
        f.store.fetch_and_decrypt(WRAPPER).await;
        assert!(f.store.get_state(WRAPPER).await.decrypted_value.is_some());

        f.store.on_wallet_changed(Some(Address::repeat_byte(0x99))).await;
        assert_eq!(f.store.get_state(WRAPPER).await, TokenBalanceState::default());
    }

    #[tokio::test]
    async fn fetch_after_implicit_account_switch_starts_clean() {
        let f = fixture();
        let other = Address::repeat_byte(0xC2);
        f.store.fetch_and_decrypt(other).await;

        f.wallet.set_address(Some(Address::repeat_byte(0x77)));
        f.store.fetch_and_decrypt(WRAPPER).await;

        assert_eq!(f.store.get_state(other).await, TokenBalanceState::default());
    }
}
