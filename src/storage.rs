//! In-memory key/value storage.
//!
//! A single reader-writer lock guards the map: readers share it, writers are
//! exclusive. `list` hands back a copy so callers can iterate while others
//! keep writing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::container::{Hook, Module, Provider};
use crate::database::Database;
use crate::logger::Logger;

/// Storage trait - one value type per store.
#[async_trait]
pub trait Storage<V>: Send + Sync {
    /// Insert or replace.
    async fn set(&self, key: String, value: V);

    async fn get(&self, key: &str) -> Option<V>;

    /// No-op when the key is absent.
    async fn delete(&self, key: &str);

    /// Remove and return the value, if present. Check and removal happen
    /// under one write lock.
    async fn remove(&self, key: &str) -> Option<V>;

    /// Apply `change` to the stored value in place and return the result.
    /// `None` when the key is absent, in which case nothing is written.
    async fn update(&self, key: &str, change: Box<dyn for<'a> FnOnce(&'a mut V) + Send>) -> Option<V>;

    /// Copy of the whole map taken under the read lock.
    async fn list(&self) -> HashMap<String, V>;

    async fn count(&self) -> usize;

    /// Remove everything, returning how many entries were dropped.
    async fn clear(&self) -> usize;
}

pub struct MemoryStorage<V> {
    data: RwLock<HashMap<String, V>>,
    log: Logger,
}

impl<V> MemoryStorage<V> {
    pub fn new(log: Logger) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            log,
        }
    }
}

#[async_trait]
impl<V> Storage<V> for MemoryStorage<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn set(&self, key: String, value: V) {
        self.log.in_scope(|| debug!(key = %key, "item stored"));
        self.data.write().await.insert(key, value);
    }

    async fn get(&self, key: &str) -> Option<V> {
        self.data.read().await.get(key).cloned()
    }

    async fn delete(&self, key: &str) {
        self.data.write().await.remove(key);
        self.log.in_scope(|| debug!(key = %key, "item deleted"));
    }

    async fn remove(&self, key: &str) -> Option<V> {
        let removed = self.data.write().await.remove(key);
        if removed.is_some() {
            self.log.in_scope(|| debug!(key = %key, "item deleted"));
        }
        removed
    }

    async fn update(&self, key: &str, change: Box<dyn for<'a> FnOnce(&'a mut V) + Send>) -> Option<V> {
        let mut data = self.data.write().await;
        let value = data.get_mut(key)?;
        change(value);
        self.log.in_scope(|| debug!(key = %key, "item updated"));
        Some(value.clone())
    }

    async fn list(&self) -> HashMap<String, V> {
        self.data.read().await.clone()
    }

    async fn count(&self) -> usize {
        self.data.read().await.len()
    }

    async fn clear(&self) -> usize {
        let mut data = self.data.write().await;
        let removed = data.len();
        data.clear();
        removed
    }
}

/// Storage module for values of type `V`. Depends on the database only to
/// warn when it is not connected yet.
pub fn module<V>() -> Module
where
    V: Clone + Send + Sync + 'static,
{
    Module::new("storage", "In-Memory Storage").provide(Provider::new(
        "new_storage",
        |lc, (log, database): (Logger, Arc<dyn Database>)| {
            let log = log.with_component("storage");
            let storage = Arc::new(MemoryStorage::<V>::new(log.clone()));
            let clearing = Arc::clone(&storage);
            lc.append(
                Hook::new("in-memory map")
                    .instrument(log.span())
                    .on_start(move |_ctx| async move {
                        info!("initializing storage");
                        if !database.is_connected() {
                            warn!("database not connected, storage may have limited functionality");
                        }
                        info!(capacity = "unlimited", "storage initialized");
                        anyhow::Ok(())
                    })
                    .on_stop(move |_ctx| async move {
                        info!("clearing storage");
                        let removed = clearing.clear().await;
                        info!(items_removed = removed, "storage cleared");
                        anyhow::Ok(())
                    }),
            );
            Ok(storage as Arc<dyn Storage<V>>)
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStorage<String> {
        MemoryStorage::new(Logger::root())
    }

    #[tokio::test]
    async fn set_replaces_and_get_reports_absence() {
        let storage = store();
        assert_eq!(storage.get("a").await, None);

        storage.set("a".to_string(), "one".to_string()).await;
        storage.set("a".to_string(), "two".to_string()).await;

        assert_eq!(storage.get("a").await.as_deref(), Some("two"));
        assert_eq!(storage.count().await, 1);
    }

    #[tokio::test]
    async fn delete_is_a_no_op_for_missing_keys() {
        let storage = store();
        storage.set("a".to_string(), "one".to_string()).await;
        storage.delete("missing").await;
        storage.delete("a").await;
        storage.delete("a").await;
        assert_eq!(storage.count().await, 0);
    }

    #[tokio::test]
    async fn remove_hands_back_the_value_once() {
        let storage = store();
        storage.set("a".to_string(), "one".to_string()).await;

        assert_eq!(storage.remove("a").await.as_deref(), Some("one"));
        assert_eq!(storage.remove("a").await, None);
        assert_eq!(storage.count().await, 0);
    }

    #[tokio::test]
    async fn update_changes_in_place_and_skips_missing_keys() {
        let storage = store();
        storage.set("a".to_string(), "one".to_string()).await;

        let updated = storage
            .update("a", Box::new(|value: &mut String| value.push_str("-more")))
            .await;
        assert_eq!(updated.as_deref(), Some("one-more"));
        assert_eq!(storage.get("a").await.as_deref(), Some("one-more"));

        let missing = storage
            .update("b", Box::new(|value: &mut String| value.clear()))
            .await;
        assert_eq!(missing, None);
        assert_eq!(storage.get("b").await, None);
        assert_eq!(storage.count().await, 1);
    }

    #[tokio::test]
    async fn list_is_a_detached_snapshot() {
        let storage = store();
        storage.set("a".to_string(), "one".to_string()).await;
        let snapshot = storage.list().await;

        storage.set("b".to_string(), "two".to_string()).await;
        storage.delete("a").await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("a").map(String::as_str), Some("one"));
        assert_eq!(storage.count().await, 1);
    }

    #[tokio::test]
    async fn clear_reports_removed_entries() {
        let storage = store();
        for key in ["a", "b", "c"] {
            storage.set(key.to_string(), key.to_uppercase()).await;
        }
        assert_eq!(storage.clear().await, 3);
        assert_eq!(storage.count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_lose_entries() {
        let storage = Arc::new(store());
        let writers: Vec<_> = (0..32)
            .map(|i| {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move {
                    storage.set(format!("key-{i}"), format!("value-{i}")).await;
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }
        assert_eq!(storage.count().await, 32);
        assert_eq!(storage.list().await.len(), 32);
    }
}
