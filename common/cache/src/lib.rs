//! Generic cache-aside layer
//!
//! This crate turns an async compute function into a cached one, over any
//! backend from `common-store`. It supports:
//!
//! - Single-key and batched calls, with partial-hit backfill for batches
//! - Pluggable codecs (JSON by default) and optional gzip/zstd compression
//! - Native values on in-process backends, no encoding needed
//! - A registry of named backends resolved once per wrapper
//! - Rich return types indicating cache source and write-back outcome
//! - User-defined error types; only compute errors fail a call
//!
//! # Example
//!
//! ```rust,ignore
//! use common_cache::{BackendRegistry, CacheSource, CacheWrapper, WrapperConfig};
//! use common_store::RedisConfig;
//!
//! let registry = BackendRegistry::new()
//!     .with_backend("redis", RedisConfig::init_from_env()?.connect().await?);
//!
//! let config = WrapperConfig::new("quiz:{}:participants", "redis")?
//!     .with_ttl(Duration::from_secs(300))
//!     .compressed()
//!     .batch();
//! let participants: CacheWrapper<i64, Vec<Participant>> = CacheWrapper::new(&registry, config);
//!
//! let result = participants
//!     .get_or_compute_batch(&quiz_ids, |missing| async move {
//!         load_participants(&missing).await
//!     })
//!     .await?;
//!
//! if result.backend_unavailable {
//!     println!("served {} quizzes without the cache", result.values.len());
//! }
//! ```

pub mod key;
pub mod metrics;
pub mod registry;
pub mod types;
pub mod wrapper;

pub use key::{ConfigError, KeyTemplate};
pub use metrics::CacheWrapperWithMetrics;
pub use registry::BackendRegistry;
pub use types::{
    BatchCacheResult, CacheResult, CacheSource, KeyShape, WrapperConfig, WriteBack, WriteError,
};
pub use wrapper::CacheWrapper;
