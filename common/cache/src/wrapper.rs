//! Cache-aside wrapper around a compute function
//!
//! [`CacheWrapper`] turns an async "compute the value for this key" function
//! into a cached one:
//! - Single-key and batch (partial-hit backfill) invocation
//! - Values encoded with a [`Codec`] and optionally compressed, or kept native
//!   on backends that can hold them
//! - Read failures (backend down, corrupt entries) fall back to compute
//! - Best-effort write-back, reported through [`WriteBack`]
//!
//! Only the compute function's error can fail a call.

use common_codec::{Codec, CodecError, JsonCodec};
use common_compression::CompressionError;
use common_store::{CacheBackend, CacheValue, StoreError};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    BackendRegistry, BatchCacheResult, CacheResult, CacheSource, KeyShape, WrapperConfig,
    WriteBack, WriteError,
};

/// Why a cached entry could not be turned back into a value
#[derive(Debug)]
enum ReadFailure {
    Decompress(CompressionError),
    Decode(CodecError),
    NativeTypeMismatch,
}

impl ReadFailure {
    fn source(&self) -> CacheSource {
        match self {
            ReadFailure::Decompress(_) => CacheSource::ComputedDecompressFailure,
            ReadFailure::Decode(_) | ReadFailure::NativeTypeMismatch => {
                CacheSource::ComputedDecodeFailure
            }
        }
    }
}

impl Display for ReadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadFailure::Decompress(e) => write!(f, "decompress_fail: {e}"),
            ReadFailure::Decode(e) => write!(f, "decode_fail: {e}"),
            ReadFailure::NativeTypeMismatch => write!(f, "decode_fail: cached value has another type"),
        }
    }
}

/// A cached function from `K` to `V`.
///
/// # Example
/// ```rust,ignore
/// use common_cache::{BackendRegistry, CacheWrapper, WrapperConfig};
///
/// let config = WrapperConfig::new("quiz:{}", "redis")?.with_ttl(Duration::from_secs(300));
/// let quizzes: CacheWrapper<i64, Quiz> = CacheWrapper::new(&registry, config);
///
/// let result = quizzes
///     .get_or_compute(&quiz_id, |id| async move { db.load_quiz(id).await })
///     .await?;
/// ```
pub struct CacheWrapper<K, V, C = JsonCodec> {
    backend: Arc<dyn CacheBackend>,
    config: WrapperConfig<C>,
    _types: PhantomData<fn(K) -> V>,
}

impl<K, V, C> CacheWrapper<K, V, C>
where
    K: Display + Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync + 'static,
    C: Codec<V>,
{
    /// # Panics
    /// If `config.backend` is not registered.
    pub fn new(registry: &BackendRegistry, config: WrapperConfig<C>) -> Self {
        let backend = registry.resolve(&config.backend);
        Self::with_backend(backend, config)
    }

    /// Use `backend` directly, ignoring `config.backend`.
    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: WrapperConfig<C>) -> Self {
        Self {
            backend,
            config,
            _types: PhantomData,
        }
    }

    pub fn config(&self) -> &WrapperConfig<C> {
        &self.config
    }

    pub fn physical_key(&self, key: &K) -> String {
        self.config.key_template.format(key)
    }

    /// Compressed entries are always bytes; otherwise the backend decides.
    fn stores_bytes(&self) -> bool {
        self.config.compression.is_some() || self.backend.needs_encoding()
    }

    fn assert_shape(&self, expected: KeyShape) {
        if self.config.shape != expected {
            panic!(
                "cache wrapper for {} is configured for {:?} keys but was called with {:?} keys",
                self.config.key_template, self.config.shape, expected
            );
        }
    }

    fn decode_entry(&self, entry: CacheValue) -> Result<V, ReadFailure> {
        if !self.stores_bytes() {
            return entry.downcast::<V>().ok_or(ReadFailure::NativeTypeMismatch);
        }

        let Some(bytes) = entry.as_bytes() else {
            return Err(ReadFailure::NativeTypeMismatch);
        };
        match &self.config.compression {
            Some(format) => {
                let decompressed = format.decompress(bytes).map_err(ReadFailure::Decompress)?;
                self.config
                    .codec
                    .decode(&decompressed)
                    .map_err(ReadFailure::Decode)
            }
            None => self.config.codec.decode(bytes).map_err(ReadFailure::Decode),
        }
    }

    fn encode_entry(&self, value: &V) -> Result<CacheValue, WriteError> {
        if !self.stores_bytes() {
            return Ok(CacheValue::native(value.clone()));
        }

        let encoded = self.config.codec.encode(value)?;
        let bytes = match &self.config.compression {
            Some(format) => format.compress(&encoded)?,
            None => encoded,
        };
        Ok(CacheValue::Bytes(bytes))
    }

    /// Read `key` from the cache, or compute and store it.
    ///
    /// Backend, decode and decompress failures are logged and treated as a
    /// miss. A failed write-back is logged and reported in the result.
    ///
    /// # Errors
    /// Only the error returned by `compute`.
    ///
    /// # Panics
    /// If the wrapper is configured for batch keys.
    pub async fn get_or_compute<E, F, Fut>(&self, key: &K, compute: F) -> Result<CacheResult<V>, E>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.assert_shape(KeyShape::Single);
        let cache_key = self.physical_key(key);

        let source = match self.backend.get(&cache_key).await {
            Ok(Some(entry)) => match self.decode_entry(entry) {
                Ok(value) => {
                    debug!("cache hit for key {}", cache_key);
                    return Ok(CacheResult::hit(value));
                }
                Err(failure) => {
                    warn!("{}|cacheKey={}", failure, cache_key);
                    failure.source()
                }
            },
            Ok(None) => {
                debug!("cache miss for key {}", cache_key);
                CacheSource::ComputedMiss
            }
            Err(err) => {
                warn!("cache read failed for key {}: {}", cache_key, err);
                CacheSource::ComputedBackendUnavailable
            }
        };

        let value = compute(key.clone()).await?;
        let write_back = self.write_one(&cache_key, &value).await;

        Ok(CacheResult::computed(value, source, write_back))
    }

    async fn write_one(&self, cache_key: &str, value: &V) -> WriteBack {
        let entry = match self.encode_entry(value) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("cache encode failed for key {}: {}", cache_key, err);
                return WriteBack::Failed(err);
            }
        };

        match self.backend.set(cache_key, entry, self.config.ttl).await {
            Ok(()) => WriteBack::Stored {
                stored: 1,
                skipped: 0,
            },
            Err(err) => {
                warn!("cache write failed for key {}: {}", cache_key, err);
                WriteBack::Failed(WriteError::Store(err))
            }
        }
    }

    /// Read all `keys` in one round trip, compute the missing ones in one
    /// call and store them in one write.
    ///
    /// `compute` gets the missing keys in request order, each key once. A
    /// failed batch read makes every key missing. Duplicate request keys
    /// collapse in the returned map.
    ///
    /// # Errors
    /// Only the error returned by `compute`.
    ///
    /// # Panics
    /// If the wrapper is configured for single keys.
    pub async fn get_or_compute_batch<E, F, Fut>(
        &self,
        keys: &[K],
        compute: F,
    ) -> Result<BatchCacheResult<K, V>, E>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<HashMap<K, V>, E>>,
    {
        self.assert_shape(KeyShape::Batch);
        let mut result = BatchCacheResult::empty();
        if keys.is_empty() {
            return Ok(result);
        }

        let mut seen = HashSet::with_capacity(keys.len());
        let unique: Vec<&K> = keys.iter().filter(|key| seen.insert(*key)).collect();
        let cache_keys: Vec<String> = unique.iter().map(|key| self.physical_key(key)).collect();

        let mut missing: Vec<K> = Vec::new();
        match self.backend.batch_get(&cache_keys).await {
            Ok(entries) => {
                // A short reply leaves the remaining keys missing
                let mut entries = entries.into_iter();
                for (key, cache_key) in unique.iter().zip(&cache_keys) {
                    match entries.next().flatten() {
                        Some(entry) => match self.decode_entry(entry) {
                            Ok(value) => {
                                result.values.insert((*key).clone(), value);
                                result.hits += 1;
                            }
                            Err(failure) => {
                                warn!("{}|cacheKey={}", failure, cache_key);
                                result.corrupted += 1;
                                missing.push((*key).clone());
                            }
                        },
                        None => missing.push((*key).clone()),
                    }
                }
            }
            Err(err) => {
                warn!(
                    "cache batch read failed for {} keys: {}",
                    cache_keys.len(),
                    err
                );
                result.backend_unavailable = true;
                missing = unique.into_iter().cloned().collect();
            }
        }

        if missing.is_empty() {
            debug!("cache batch hit for all {} keys", result.hits);
            return Ok(result);
        }

        result.misses = missing.len();
        let computed = compute(missing).await?;
        result.write_back = self.write_many(&computed).await;
        result.values.extend(computed);

        Ok(result)
    }

    async fn write_many(&self, computed: &HashMap<K, V>) -> WriteBack {
        if computed.is_empty() {
            return WriteBack::Skipped;
        }

        let mut pairs = Vec::with_capacity(computed.len());
        let mut first_error = None;
        let mut skipped = 0;
        for (key, value) in computed {
            let cache_key = self.physical_key(key);
            match self.encode_entry(value) {
                Ok(entry) => pairs.push((cache_key, entry)),
                Err(err) => {
                    warn!("cache encode failed for key {}: {}", cache_key, err);
                    skipped += 1;
                    first_error.get_or_insert(err);
                }
            }
        }

        if pairs.is_empty() {
            return match first_error {
                Some(err) => WriteBack::Failed(err),
                None => WriteBack::Skipped,
            };
        }

        let stored = pairs.len();
        match self.backend.batch_set(pairs, self.config.ttl).await {
            Ok(()) => WriteBack::Stored { stored, skipped },
            Err(err) => {
                warn!("cache batch write failed for {} keys: {}", stored, err);
                WriteBack::Failed(WriteError::Store(err))
            }
        }
    }

    /// Delete the cached entries of `keys`, returning how many existed.
    ///
    /// Unlike the read paths, backend errors are returned.
    pub async fn invalidate(&self, keys: &[K]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let cache_keys: Vec<String> = keys.iter().map(|key| self.physical_key(key)).collect();
        self.backend.delete(&cache_keys).await
    }
}
