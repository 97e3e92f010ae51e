//! Multi-step state machines for wrap, unwrap and transfer.
//!
//! Every orchestrator catches failures at the step boundary, records a
//! [`StepError`](crate::errors::StepError) scoped to the failing step and
//! returns the error to the caller. Completion always invalidates the
//! affected balance entry before an [`OperationEvent`](crate::events::OperationEvent)
//! is emitted.

pub mod transfer;
pub mod unwrap;
pub mod wrap;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy::primitives::Address;

use crate::balance::ConfidentialBalanceStore;
use crate::encryption::FheAdapter;
use crate::errors::OperationError;
use crate::events::EventBus;
use crate::ports::contracts::ContractPort;
use crate::ports::fhe::FheEngine;
use crate::ports::wallet::WalletPort;
use crate::requirements::WALLET_LABEL;

/// Service handles shared by the orchestrators.
pub struct OperationContext<C: ContractPort, E: FheEngine, W: WalletPort> {
    pub contracts: Arc<C>,
    pub fhe: FheAdapter<E>,
    pub wallet: Arc<W>,
    pub balances: Arc<ConfidentialBalanceStore<C, E, W>>,
    pub events: EventBus,
}

impl<C: ContractPort, E: FheEngine, W: WalletPort> Clone for OperationContext<C, E, W> {
    fn clone(&self) -> Self {
        Self {
            contracts: Arc::clone(&self.contracts),
            fhe: self.fhe.clone(),
            wallet: Arc::clone(&self.wallet),
            balances: Arc::clone(&self.balances),
            events: self.events.clone(),
        }
    }
}

impl<C: ContractPort, E: FheEngine, W: WalletPort> OperationContext<C, E, W> {
    /// Wire the services together, creating the balance store.
    pub fn new(contracts: Arc<C>, engine: Arc<E>, wallet: Arc<W>, events: EventBus) -> Self {
        let fhe = FheAdapter::new(engine);
        let balances = Arc::new(ConfidentialBalanceStore::new(
            Arc::clone(&contracts),
            fhe.clone(),
            Arc::clone(&wallet),
        ));
        Self {
            contracts,
            fhe,
            wallet,
            balances,
            events,
        }
    }

    /// The connected account that signs and sends transactions.
    pub fn sender(&self) -> Result<Address, OperationError> {
        self.wallet
            .address()
            .ok_or_else(|| OperationError::RequirementsNotMet(WALLET_LABEL.into()))
    }

    /// Refuse unless every decryption prerequisite holds.
    pub fn require_decryption(&self) -> Result<Address, OperationError> {
        let requirements = self.balances.requirements();
        if !requirements.can_decrypt {
            return Err(OperationError::RequirementsNotMet(
                requirements.missing_message.unwrap_or_default(),
            ));
        }
        self.sender()
    }
}

/// Exclusive marker for an operation in flight.
///
/// The slot is released when the guard returned by [`claim`](Self::claim)
/// drops, so a caller that abandons the operation future frees it as well.
pub(crate) struct InFlight<T> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone> InFlight<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current(&self) -> Option<T> {
        self.lock().clone()
    }

    pub(crate) fn is_held(&self) -> bool {
        self.lock().is_some()
    }

    /// Take the slot for `value`, or return the value already holding it.
    pub(crate) fn claim(&self, value: T) -> Result<InFlightGuard<'_, T>, T> {
        let mut slot = self.lock();
        if let Some(held) = slot.as_ref() {
            return Err(held.clone());
        }
        *slot = Some(value);
        Ok(InFlightGuard { owner: self })
    }
}

pub(crate) struct InFlightGuard<'a, T: Clone> {
    owner: &'a InFlight<T>,
}

impl<T: Clone> Drop for InFlightGuard<'_, T> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}
