use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use redis::ErrorKind as RedisErrorKind;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
    #[error("Backend error: {0}")]
    Other(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Redis(Arc::new(err))
        }
    }
}

impl StoreError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        StoreError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// Determine if this error is permanent
    ///
    /// Returns `true` for configuration errors, bad arguments and protocol failures.
    /// Returns `false` for transient network/connection issues that may resolve on their own.
    pub fn is_unrecoverable_error(&self) -> bool {
        match self {
            StoreError::Timeout => false,
            StoreError::Other(_) => false,
            StoreError::InvalidConfiguration(_) => true,
            StoreError::InvalidArgument(_) => true,
            StoreError::UnsupportedValue(_) => true,
            StoreError::Redis(err) => {
                matches!(
                    err.kind(),
                    redis::ErrorKind::InvalidClientConfig | redis::ErrorKind::AuthenticationFailed
                ) || err.is_unrecoverable_error()
            }
        }
    }
}

/// A value as held by a backend.
///
/// Backends that only store bytes (see [`CacheBackend::needs_encoding`]) only
/// accept and return [`CacheValue::Bytes`]. In-process backends may also keep
/// the caller's value as is, type-erased behind an `Arc`.
#[derive(Clone)]
pub enum CacheValue {
    Bytes(Vec<u8>),
    Native(Arc<dyn Any + Send + Sync>),
}

impl CacheValue {
    pub fn native<V: Any + Send + Sync>(value: V) -> Self {
        CacheValue::Native(Arc::new(value))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Bytes(bytes) => Some(bytes),
            CacheValue::Native(_) => None,
        }
    }

    /// Take the bytes out, failing for native values.
    pub fn into_bytes(self) -> Result<Vec<u8>, StoreError> {
        match self {
            CacheValue::Bytes(bytes) => Ok(bytes),
            CacheValue::Native(_) => Err(StoreError::UnsupportedValue(
                "native values must be encoded before they are written to this backend"
                    .to_string(),
            )),
        }
    }

    /// Clone the native value out if it holds a `V`.
    pub fn downcast<V: Any + Clone>(&self) -> Option<V> {
        match self {
            CacheValue::Native(value) => value.downcast_ref::<V>().cloned(),
            CacheValue::Bytes(_) => None,
        }
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            CacheValue::Native(_) => f.write_str("Native(..)"),
        }
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        CacheValue::Bytes(bytes)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Bytes(value.as_bytes().to_vec())
    }
}

/// The contract every cache backend satisfies.
///
/// A missing key is `Ok(None)`, never an error. A `None` TTL means the entry
/// does not expire (or, for backends with a default TTL, that the default applies).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Whether values must be serialized before they can be stored.
    fn needs_encoding(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError>;

    /// Values come back in the order of `keys`, with `None` for missing entries.
    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, StoreError>;

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    async fn batch_set(
        &self,
        pairs: Vec<(String, CacheValue)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Returns how many of the keys existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;
}

mod cluster;
mod config;
mod kv;
mod memory;
mod mock;
mod redis_store;

pub use cluster::ClusteredRedisStore;
pub use config::{RedisConfig, RedisOptions};
pub use kv::{KeyValueStore, SCAN_BATCH_SIZE};
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use mock::{MockStore, MockStoreCall, MockStoreValue};
pub use redis_store::RedisStore;
