//! Key-value store abstraction

use crate::db::DatabasePool;
use crate::repository::EntryRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use subroute_common::config::{StoreBackend, StoreConfig};
use subroute_common::Result;
use tokio::sync::RwLock;
use tracing::info;

/// Read access to stored routing configuration
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Look up a key; `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Process-local store backed by a map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().await.insert(key.into(), value.into());
    }

    /// Remove an entry, returning its previous value
    pub async fn remove(&self, key: &str) -> Option<String> {
        self.entries.write().await.remove(key)
    }

    /// Number of entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store has no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }
}

/// Create the store selected by configuration
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using empty in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            let db = DatabasePool::open(&config.path).await?;
            db.migrate().await?;
            Ok(Arc::new(EntryRepository::new(db)))
        }
    }
}
