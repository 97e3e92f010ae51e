use std::future::Future;

/// Port for small client-side persisted values (the browser's local storage
/// in a web client; a JSON file or memory here).
///
/// Implementations:
/// - `JsonFileStore`
/// - `InMemoryKeyValueStore` for testing
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Replace the value stored under `key`.
    fn save(&self, key: &str, value: String) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store contents: {0}")]
    Corrupt(String),
}
