//! In-process backend on top of Moka
//!
//! Values are kept as they are handed in, so callers can store native values
//! without encoding them. Each entry carries its own TTL; entries written
//! without one fall back to the store's default TTL.

use async_trait::async_trait;
use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

use crate::{CacheBackend, CacheValue, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStoreConfig {
    /// Maximum number of entries before the least recently used are evicted
    pub max_capacity: u64,
    /// TTL for entries written without one. `None` keeps them until evicted.
    pub default_ttl: Option<Duration>,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            default_ttl: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Clone)]
struct MemoryEntry {
    value: CacheValue,
    ttl: Option<Duration>,
}

struct EntryExpiry {
    default_ttl: Option<Duration>,
}

impl Expiry<String, MemoryEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &MemoryEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl.or(self.default_ttl)
    }

    // An overwrite restarts the clock with the new entry's TTL.
    fn expire_after_update(
        &self,
        _key: &String,
        entry: &MemoryEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl.or(self.default_ttl)
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<String, MemoryEntry>,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(EntryExpiry {
                default_ttl: config.default_ttl,
            })
            .build();

        Self { cache }
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    fn insert(&self, key: String, value: CacheValue, ttl: Option<Duration>) {
        self.cache.insert(key, MemoryEntry { value, ttl });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    fn needs_encoding(&self) -> bool {
        false
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError> {
        Ok(self.cache.get(key).map(|entry| entry.value))
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, StoreError> {
        Ok(keys
            .iter()
            .map(|key| self.cache.get(key).map(|entry| entry.value))
            .collect())
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.insert(key.to_string(), value, ttl);
        Ok(())
    }

    async fn batch_set(
        &self,
        pairs: Vec<(String, CacheValue)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        for (key, value) in pairs {
            self.insert(key, value, ttl);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let removed = keys
            .iter()
            .filter(|key| self.cache.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_default_ttl(default_ttl: Option<Duration>) -> MemoryStore {
        MemoryStore::new(MemoryStoreConfig {
            max_capacity: 100,
            default_ttl,
        })
    }

    #[tokio::test]
    async fn test_native_values_come_back_unencoded() {
        let store = MemoryStore::default();
        assert!(!store.needs_encoding());

        store
            .set("quiz:1", CacheValue::native(vec![3u32, 1, 4]), None)
            .await
            .unwrap();

        let value = store.get("quiz:1").await.unwrap().unwrap();
        assert_eq!(value.downcast::<Vec<u32>>(), Some(vec![3, 1, 4]));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryStore::default();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_get_preserves_order_and_gaps() {
        let store = MemoryStore::default();
        store
            .batch_set(
                vec![
                    ("a".to_string(), CacheValue::from("1")),
                    ("c".to_string(), CacheValue::from("3")),
                ],
                None,
            )
            .await
            .unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = store.batch_get(&keys).await.unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].as_ref().and_then(|v| v.as_bytes()), Some(&b"1"[..]));
        assert!(values[1].is_none());
        assert_eq!(values[2].as_ref().and_then(|v| v.as_bytes()), Some(&b"3"[..]));
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = store_with_default_ttl(None);
        store
            .set("short", CacheValue::native(1u8), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(store.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_ttl_applies_without_explicit_ttl() {
        let store = store_with_default_ttl(Some(Duration::from_millis(50)));
        store.set("k", CacheValue::native(1u8), None).await.unwrap();
        store
            .set("long", CacheValue::native(2u8), Some(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value_and_ttl() {
        let store = store_with_default_ttl(None);
        store
            .set("k", CacheValue::native(1u8), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        store.set("k", CacheValue::native(2u8), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let value = store.get("k").await.unwrap().unwrap();
        assert_eq!(value.downcast::<u8>(), Some(2));
    }

    #[tokio::test]
    async fn test_delete_counts_existing_keys() {
        let store = MemoryStore::default();
        store.set("a", CacheValue::from("1"), None).await.unwrap();
        store.set("b", CacheValue::from("2"), None).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
        assert_eq!(store.delete(&keys).await.unwrap(), 2);
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.delete(&keys).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_and_entry_count() {
        let store = MemoryStore::default();
        store.set("a", CacheValue::from("1"), None).await.unwrap();
        store.set("b", CacheValue::from("2"), None).await.unwrap();
        assert_eq!(store.entry_count(), 2);

        store.clear();
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_capacity_bounds_entry_count() {
        let store = MemoryStore::new(MemoryStoreConfig {
            max_capacity: 10,
            default_ttl: None,
        });

        for i in 0..50 {
            store
                .set(&format!("quiz:{i}"), CacheValue::native(i), None)
                .await
                .unwrap();
        }

        let count = store.entry_count();
        assert!(count > 0);
        assert!(count <= 10, "entry_count {count} exceeds capacity");

        let keys: Vec<String> = (0..50).map(|i| format!("quiz:{i}")).collect();
        let live = store
            .batch_get(&keys)
            .await
            .unwrap()
            .into_iter()
            .flatten()
            .count();
        assert!(live <= 10, "{live} entries still readable");
    }
}
