//! Metrics decorator for CacheWrapper
//!
//! This module provides a wrapper around [`CacheWrapper`] that emits counters
//! through the `metrics` crate, keeping the core wrapper free of metrics code.
//! Nothing is recorded unless the embedding service installs a recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use common_cache::{CacheWrapper, CacheWrapperWithMetrics, WrapperConfig};
//!
//! let quizzes = Arc::new(CacheWrapper::new(&registry, WrapperConfig::new("quiz:{}", "redis")?));
//!
//! let quizzes = CacheWrapperWithMetrics::new(
//!     quizzes,
//!     "quiz_api", // namespace for metrics
//!     "quiz",     // cache_name for metrics
//!     &[("backend".to_string(), "redis".to_string())],
//! );
//!
//! let result = quizzes.get_or_compute(&quiz_id, load_quiz).await?;
//! ```

use common_codec::Codec;
use common_store::StoreError;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use crate::{BatchCacheResult, CacheResult, CacheSource, CacheWrapper, WriteBack};

const READS: &str = "cache_wrapper_reads_total";
const HITS: &str = "cache_wrapper_hit_total";
const COMPUTE_INVOKED: &str = "cache_wrapper_compute_invoked_total";
const COMPUTE_ERRORS: &str = "cache_wrapper_compute_errors_total";
const ERRORS: &str = "cache_wrapper_errors_total";
const WRITE_BACK_FAILURES: &str = "cache_wrapper_write_back_failures_total";
const BATCH_KEYS: &str = "cache_wrapper_batch_keys_total";

/// Wrapper around [`CacheWrapper`] that emits metrics
///
/// # Metrics Emitted
///
/// All metrics carry the labels `namespace`, `cache_name`, plus any additional labels
///
/// - `cache_wrapper_reads_total{source="..."}` - Calls, by [`CacheSource`]
/// - `cache_wrapper_hit_total{cache_hit="true|false"}` - Single-key hit/miss tracking
/// - `cache_wrapper_compute_invoked_total` - Times the compute function was called
/// - `cache_wrapper_compute_errors_total` - Calls that failed because compute failed
/// - `cache_wrapper_errors_total{reason="..."}` - Read-path problems (backend, corrupt entries)
/// - `cache_wrapper_write_back_failures_total{reason="encode|compress|store"}`
/// - `cache_wrapper_batch_keys_total{result="hit|miss"}` - Per-key counts of batch calls
pub struct CacheWrapperWithMetrics<K, V, C> {
    inner: Arc<CacheWrapper<K, V, C>>,
    namespace: &'static str,
    cache_name: &'static str,
    additional_labels: Vec<(String, String)>,
}

impl<K, V, C> CacheWrapperWithMetrics<K, V, C>
where
    K: Display + Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync + 'static,
    C: Codec<V>,
{
    pub fn new(
        inner: Arc<CacheWrapper<K, V, C>>,
        namespace: &'static str,
        cache_name: &'static str,
        additional_labels: &[(String, String)],
    ) -> Self {
        Self {
            inner,
            namespace,
            cache_name,
            additional_labels: additional_labels.to_vec(),
        }
    }

    pub fn inner(&self) -> &CacheWrapper<K, V, C> {
        &self.inner
    }

    pub async fn get_or_compute<E, F, Fut>(&self, key: &K, compute: F) -> Result<CacheResult<V>, E>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        match self.inner.get_or_compute(key, compute).await {
            Ok(result) => {
                self.emit_metrics(&result);
                Ok(result)
            }
            Err(err) => {
                self.emit_compute_error();
                Err(err)
            }
        }
    }

    pub async fn get_or_compute_batch<E, F, Fut>(
        &self,
        keys: &[K],
        compute: F,
    ) -> Result<BatchCacheResult<K, V>, E>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = Result<HashMap<K, V>, E>>,
    {
        match self.inner.get_or_compute_batch(keys, compute).await {
            Ok(result) => {
                self.emit_batch_metrics(&result);
                Ok(result)
            }
            Err(err) => {
                self.emit_compute_error();
                Err(err)
            }
        }
    }

    pub async fn invalidate(&self, keys: &[K]) -> Result<u64, StoreError> {
        self.inner.invalidate(keys).await
    }

    fn base_labels(&self) -> Vec<(String, String)> {
        let mut labels = vec![
            ("namespace".to_string(), self.namespace.to_string()),
            ("cache_name".to_string(), self.cache_name.to_string()),
        ];
        labels.extend(self.additional_labels.iter().cloned());
        labels
    }

    fn inc_with(&self, name: &'static str, label: (&str, String), value: u64) {
        let mut labels = self.base_labels();
        labels.push((label.0.to_string(), label.1));
        ::metrics::counter!(name, &labels).increment(value);
    }

    fn emit_compute_error(&self) {
        let labels = self.base_labels();
        ::metrics::counter!(COMPUTE_INVOKED, &labels).increment(1);
        ::metrics::counter!(COMPUTE_ERRORS, &labels).increment(1);
    }

    fn emit_write_back(&self, write_back: &WriteBack) {
        if let WriteBack::Failed(err) = write_back {
            self.inc_with(WRITE_BACK_FAILURES, ("reason", err.reason().to_string()), 1);
        }
    }

    fn emit_metrics(&self, result: &CacheResult<V>) {
        let base_labels = self.base_labels();

        self.inc_with(READS, ("source", result.source.to_string()), 1);
        self.inc_with(HITS, ("cache_hit", result.was_cached().to_string()), 1);

        if result.invoked_compute() {
            ::metrics::counter!(COMPUTE_INVOKED, &base_labels).increment(1);
        }

        if result.had_cache_problem() {
            self.inc_with(ERRORS, ("reason", result.source.to_string()), 1);
        }

        self.emit_write_back(&result.write_back);
    }

    fn emit_batch_metrics(&self, result: &BatchCacheResult<K, V>) {
        let base_labels = self.base_labels();

        let source = if result.backend_unavailable {
            CacheSource::ComputedBackendUnavailable
        } else if result.invoked_compute() {
            CacheSource::ComputedMiss
        } else {
            CacheSource::Hit
        };
        self.inc_with(READS, ("source", source.to_string()), 1);

        self.inc_with(BATCH_KEYS, ("result", "hit".to_string()), result.hits as u64);
        self.inc_with(BATCH_KEYS, ("result", "miss".to_string()), result.misses as u64);

        if result.invoked_compute() {
            ::metrics::counter!(COMPUTE_INVOKED, &base_labels).increment(1);
        }

        if result.backend_unavailable {
            self.inc_with(ERRORS, ("reason", source.to_string()), 1);
        }
        if result.corrupted > 0 {
            self.inc_with(
                ERRORS,
                ("reason", "corrupted_entry".to_string()),
                result.corrupted as u64,
            );
        }

        self.emit_write_back(&result.write_back);
    }
}
