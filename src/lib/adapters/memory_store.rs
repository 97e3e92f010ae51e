use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::ports::storage::{KeyValueStore, StoreError};

/// In-memory implementation of `KeyValueStore` for testing.
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_loads_none() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.load("customTokens").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_value() {
        let store = InMemoryKeyValueStore::new();
        store.save("k", "a".into()).await.unwrap();
        store.save("k", "b".into()).await.unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("b"));
    }
}
