use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

use crate::redis_store::batch_set_bytes;
use crate::{CacheBackend, CacheValue, KeyValueStore, RedisOptions, RedisStore, StoreError};

/// Store for proxy-based Redis clusters (Codis, twemproxy and the like).
///
/// Behaves like [`RedisStore`] except that multi-key writes go out as a plain
/// pipeline, since these proxies reject MULTI/EXEC. A batch write can
/// therefore be partially applied.
pub struct ClusteredRedisStore {
    inner: RedisStore,
}

impl ClusteredRedisStore {
    pub async fn connect(
        addr: &str,
        options: RedisOptions,
    ) -> Result<ClusteredRedisStore, StoreError> {
        let inner = RedisStore::connect(addr, options).await?;
        Ok(ClusteredRedisStore { inner })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }
}

impl From<RedisStore> for ClusteredRedisStore {
    fn from(inner: RedisStore) -> Self {
        ClusteredRedisStore { inner }
    }
}

#[async_trait]
impl CacheBackend for ClusteredRedisStore {
    fn needs_encoding(&self) -> bool {
        self.inner.needs_encoding()
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError> {
        self.inner.get(key).await
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, StoreError> {
        self.inner.batch_get(keys).await
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.inner.set(key, value, ttl).await
    }

    async fn batch_set(
        &self,
        pairs: Vec<(String, CacheValue)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        batch_set_bytes(self.inner.connection().await?, pairs, ttl, false).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.inner.delete(keys).await
    }
}

#[async_trait]
impl KeyValueStore for ClusteredRedisStore {
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        self.inner.connection().await
    }

    async fn blocking_connection(
        &self,
        timeout: Duration,
    ) -> Result<MultiplexedConnection, StoreError> {
        self.inner.blocking_connection(timeout).await
    }
}
