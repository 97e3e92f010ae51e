use alloy::primitives::{Address, B256};
use tokio::sync::broadcast;
use tracing::debug;

/// Completion signals emitted by the orchestrators.
///
/// Consumers (the token pair registry, a UI) refetch on these. By the time an
/// event is emitted the affected balance entry has already been cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationEvent {
    WrapperCreated { erc20: Address, tx_hash: B256 },
    Wrapped { wrapper: Address, tx_hash: B256 },
    UnwrapRequested { wrapper: Address, tx_hash: B256 },
    UnwrapFinalized { wrapper: Address, burnt_amount: B256 },
    Transferred { wrapper: Address, tx_hash: B256 },
    /// Something changed on-chain (or may have); refetch token pairs.
    RefreshRequested,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OperationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: OperationEvent) {
        debug!(?event, "operation event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
