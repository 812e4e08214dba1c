//! Config store adapter — an opaque KV + set contract modeled after the
//! teacher's external collaborators pattern. A real deployment backs this
//! with Redis; `InMemoryConfigStore` stands in for tests and the
//! demonstration binary.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DirectorError;

pub const SHARED_CONFIG_KEY: &str = "shared";
pub const STARTED_SET_KEY: &str = "started";

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_config(&self, name: &str) -> Result<Option<Value>, DirectorError>;
    async fn save_config(&self, name: &str, value: Value) -> Result<(), DirectorError>;
    async fn configs_list(&self) -> Result<Vec<String>, DirectorError>;

    async fn set_exists(&self, key: &str) -> Result<bool, DirectorError>;
    async fn set_add(&self, key: &str, items: &[String]) -> Result<(), DirectorError>;
    async fn set_rm(&self, key: &str, item: &str) -> Result<(), DirectorError>;
    async fn set_get(&self, key: &str) -> Result<Vec<String>, DirectorError>;
}

#[derive(Default)]
struct Inner {
    configs: HashMap<String, Value>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-memory `ConfigStore`. Never returns `ConfigStoreUnavailable` — that
/// variant exists for a real network-backed adapter to surface connection
/// failures the reconciler must absorb rather than treat as fatal.
#[derive(Default)]
pub struct InMemoryConfigStore {
    inner: Mutex<Inner>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load_config(&self, name: &str) -> Result<Option<Value>, DirectorError> {
        Ok(self.inner.lock().expect("config store mutex poisoned").configs.get(name).cloned())
    }

    async fn save_config(&self, name: &str, value: Value) -> Result<(), DirectorError> {
        self.inner
            .lock()
            .expect("config store mutex poisoned")
            .configs
            .insert(name.to_string(), value);
        Ok(())
    }

    async fn configs_list(&self) -> Result<Vec<String>, DirectorError> {
        Ok(self
            .inner
            .lock()
            .expect("config store mutex poisoned")
            .configs
            .keys()
            .cloned()
            .collect())
    }

    async fn set_exists(&self, key: &str) -> Result<bool, DirectorError> {
        Ok(self.inner.lock().expect("config store mutex poisoned").sets.contains_key(key))
    }

    async fn set_add(&self, key: &str, items: &[String]) -> Result<(), DirectorError> {
        let mut inner = self.inner.lock().expect("config store mutex poisoned");
        let set = inner.sets.entry(key.to_string()).or_default();
        for item in items {
            set.insert(item.clone());
        }
        Ok(())
    }

    async fn set_rm(&self, key: &str, item: &str) -> Result<(), DirectorError> {
        let mut inner = self.inner.lock().expect("config store mutex poisoned");
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(item);
        }
        Ok(())
    }

    async fn set_get(&self, key: &str) -> Result<Vec<String>, DirectorError> {
        Ok(self
            .inner
            .lock()
            .expect("config store mutex poisoned")
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryConfigStore::new();
        store.save_config("web", json!({"env": {"FOO": "bar"}})).await.unwrap();
        let loaded = store.load_config("web").await.unwrap();
        assert_eq!(loaded, Some(json!({"env": {"FOO": "bar"}})));
    }

    #[tokio::test]
    async fn missing_config_is_none() {
        let store = InMemoryConfigStore::new();
        assert_eq!(store.load_config("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_add_then_get_contains_item() {
        let store = InMemoryConfigStore::new();
        store.set_add(STARTED_SET_KEY, &["web".to_string()]).await.unwrap();
        let members = store.set_get(STARTED_SET_KEY).await.unwrap();
        assert!(members.contains(&"web".to_string()));
    }

    #[tokio::test]
    async fn set_rm_removes_item() {
        let store = InMemoryConfigStore::new();
        store.set_add(STARTED_SET_KEY, &["web".to_string()]).await.unwrap();
        store.set_rm(STARTED_SET_KEY, "web").await.unwrap();
        let members = store.set_get(STARTED_SET_KEY).await.unwrap();
        assert!(!members.contains(&"web".to_string()));
    }

    #[tokio::test]
    async fn set_exists_reflects_prior_add() {
        let store = InMemoryConfigStore::new();
        assert!(!store.set_exists(STARTED_SET_KEY).await.unwrap());
        store.set_add(STARTED_SET_KEY, &["web".to_string()]).await.unwrap();
        assert!(store.set_exists(STARTED_SET_KEY).await.unwrap());
    }
}
