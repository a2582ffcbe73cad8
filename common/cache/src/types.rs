//! Wrapper configuration and cache operation results
//!
//! This module contains the core types used throughout the cache wrapper:
//! - [`WrapperConfig`]: Key template, TTL, backend, codec, compression and key shape
//! - [`CacheSource`]: Where a value came from (for observability)
//! - [`CacheResult`] / [`BatchCacheResult`]: Values plus source and write-back outcome
//! - [`WriteBack`]: What happened when computed values were written to the cache

use common_codec::{CodecError, JsonCodec};
use common_compression::{CompressionError, CompressionFormat};
use common_store::StoreError;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;
use thiserror::Error;

use crate::{ConfigError, KeyTemplate};

/// Whether a wrapper is called with one key or with a collection of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyShape {
    #[default]
    Single,
    Batch,
}

/// Immutable configuration of a [`crate::CacheWrapper`]
#[derive(Debug, Clone)]
pub struct WrapperConfig<C = JsonCodec> {
    /// Physical key layout, e.g. `quiz:{}:detail`
    pub key_template: KeyTemplate,

    /// TTL of written entries. `None` leaves expiry to the backend.
    pub ttl: Option<Duration>,

    /// Name of the backend in the [`crate::BackendRegistry`]
    pub backend: String,

    pub codec: C,

    /// Compress encoded values. Enabling it also forces encoding on backends
    /// that could hold native values.
    pub compression: Option<CompressionFormat>,

    pub shape: KeyShape,
}

impl WrapperConfig<JsonCodec> {
    /// Single-key, uncompressed JSON config without a TTL.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidKeyTemplate`] unless the template has
    /// exactly one `{}` placeholder.
    pub fn new(key_template: &str, backend: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            key_template: KeyTemplate::parse(key_template)?,
            ttl: None,
            backend: backend.into(),
            codec: JsonCodec,
            compression: None,
            shape: KeyShape::Single,
        })
    }
}

impl<C> WrapperConfig<C> {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_codec<D>(self, codec: D) -> WrapperConfig<D> {
        WrapperConfig {
            key_template: self.key_template,
            ttl: self.ttl,
            backend: self.backend,
            codec,
            compression: self.compression,
            shape: self.shape,
        }
    }

    pub fn with_compression(mut self, format: CompressionFormat) -> Self {
        self.compression = Some(format);
        self
    }

    /// Compress with the default format (gzip).
    pub fn compressed(self) -> Self {
        self.with_compression(CompressionFormat::default())
    }

    pub fn batch(mut self) -> Self {
        self.shape = KeyShape::Batch;
        self
    }
}

/// Indicates where a value came from and why compute ran, if it did
///
/// This type implements `Display` for use in logging and metrics:
/// ```
/// # use common_cache::CacheSource;
/// let source = CacheSource::Hit;
/// println!("Cache result: {}", source); // "hit"
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// Value was read from the cache
    Hit,
    /// Nothing was cached - value computed
    ComputedMiss,
    /// Cached entry did not decode (or was a native value of another type) - value computed
    ComputedDecodeFailure,
    /// Cached entry did not decompress - value computed
    ComputedDecompressFailure,
    /// Backend read failed - value computed
    ComputedBackendUnavailable,
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSource::Hit => write!(f, "hit"),
            CacheSource::ComputedMiss => write!(f, "computed_miss"),
            CacheSource::ComputedDecodeFailure => write!(f, "computed_decode_failure"),
            CacheSource::ComputedDecompressFailure => write!(f, "computed_decompress_failure"),
            CacheSource::ComputedBackendUnavailable => {
                write!(f, "computed_backend_unavailable")
            }
        }
    }
}

impl CacheSource {
    pub fn was_cached(&self) -> bool {
        matches!(self, CacheSource::Hit)
    }

    pub fn invoked_compute(&self) -> bool {
        !self.was_cached()
    }

    /// Whether reading the cache went wrong, as opposed to a plain hit or miss
    pub fn had_cache_problem(&self) -> bool {
        matches!(
            self,
            CacheSource::ComputedDecodeFailure
                | CacheSource::ComputedDecompressFailure
                | CacheSource::ComputedBackendUnavailable
        )
    }
}

/// Why computed values could not be written back
#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error(transparent)]
    Compress(#[from] CompressionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WriteError {
    /// Short label for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            WriteError::Encode(_) => "encode",
            WriteError::Compress(_) => "compress",
            WriteError::Store(_) => "store",
        }
    }
}

/// Outcome of writing computed values back to the cache.
///
/// Write-back is best effort: a failure never turns into an error of the
/// call, it is only reported here.
#[derive(Debug)]
pub enum WriteBack {
    /// Nothing was computed, so nothing was written
    Skipped,
    /// `stored` entries were written; `skipped` entries failed to encode and were left out
    Stored { stored: usize, skipped: usize },
    Failed(WriteError),
}

impl WriteBack {
    pub fn is_failed(&self) -> bool {
        matches!(self, WriteBack::Failed(_))
    }

    pub fn stored_count(&self) -> usize {
        match self {
            WriteBack::Stored { stored, .. } => *stored,
            WriteBack::Skipped | WriteBack::Failed(_) => 0,
        }
    }
}

/// Result of a single-key call
#[derive(Debug)]
pub struct CacheResult<V> {
    pub value: V,

    /// Where the value came from - provides context for observability
    pub source: CacheSource,

    pub write_back: WriteBack,
}

impl<V> CacheResult<V> {
    pub fn hit(value: V) -> Self {
        Self {
            value,
            source: CacheSource::Hit,
            write_back: WriteBack::Skipped,
        }
    }

    pub fn computed(value: V, source: CacheSource, write_back: WriteBack) -> Self {
        Self {
            value,
            source,
            write_back,
        }
    }

    pub fn was_cached(&self) -> bool {
        self.source.was_cached()
    }

    pub fn invoked_compute(&self) -> bool {
        self.source.invoked_compute()
    }

    pub fn had_cache_problem(&self) -> bool {
        self.source.had_cache_problem()
    }
}

/// Result of a batch call
///
/// Counters are per distinct requested key.
#[derive(Debug)]
pub struct BatchCacheResult<K, V> {
    /// Cached and computed values. Keys compute did not return are absent.
    pub values: HashMap<K, V>,
    pub hits: usize,
    /// Keys handed to compute, including `corrupted` ones
    pub misses: usize,
    /// Entries that were present but failed to decompress or decode
    pub corrupted: usize,
    /// The batch read failed and every key was treated as missing
    pub backend_unavailable: bool,
    pub write_back: WriteBack,
}

impl<K, V> BatchCacheResult<K, V>
where
    K: Eq + Hash,
{
    pub fn empty() -> Self {
        Self {
            values: HashMap::new(),
            hits: 0,
            misses: 0,
            corrupted: 0,
            backend_unavailable: false,
            write_back: WriteBack::Skipped,
        }
    }

    pub fn invoked_compute(&self) -> bool {
        self.misses > 0
    }

    pub fn had_cache_problem(&self) -> bool {
        self.backend_unavailable || self.corrupted > 0
    }
}
