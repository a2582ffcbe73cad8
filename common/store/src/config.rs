use envconfig::Envconfig;
use std::sync::Arc;
use std::time::Duration;

use crate::{CacheBackend, ClusteredRedisStore, RedisStore, StoreError};

/// Connection settings for [`RedisStore`] and [`ClusteredRedisStore`].
///
/// A `None` timeout means no timeout. `Some(Duration::ZERO)` is rejected at
/// connect time; use `None` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisOptions {
    pub password: Option<String>,
    /// Logical database index. `None` keeps whatever the address selects.
    pub db: Option<i64>,
    /// Number of multiplexed connections commands are spread over.
    pub pool_size: usize,
    pub dial_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Pooled connections unused for longer than this are re-dialed before
    /// their next command.
    pub idle_timeout: Option<Duration>,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            password: None,
            db: None,
            pool_size: 1,
            dial_timeout: None,
            read_timeout: None,
            write_timeout: None,
            idle_timeout: None,
        }
    }
}

impl RedisOptions {
    /// Same timeout for dialing, reading and writing.
    pub fn new(db: i64, pool_size: usize, timeout: Duration) -> Self {
        Self {
            password: None,
            db: Some(db),
            pool_size,
            dial_timeout: Some(timeout),
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
            idle_timeout: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// A multiplexed connection only has one response timeout, so the larger
    /// of the configured read and write timeouts is used.
    pub fn response_timeout(&self) -> Option<Duration> {
        match (self.read_timeout, self.write_timeout) {
            (Some(read), Some(write)) => Some(read.max(write)),
            (read, write) => read.or(write),
        }
    }

    /// Response timeout for a command that waits server-side for up to
    /// `wait`. A zero wait never returns on its own, so it gets none.
    pub fn blocking_response_timeout(&self, wait: Duration) -> Option<Duration> {
        if wait.is_zero() {
            return None;
        }
        self.response_timeout()
            .map(|timeout| timeout.saturating_add(wait))
    }

    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.pool_size == 0 {
            return Err(StoreError::InvalidConfiguration(
                "Redis pool size must be at least 1".to_string(),
            ));
        }

        let timeouts = [
            ("dial", self.dial_timeout),
            ("read", self.read_timeout),
            ("write", self.write_timeout),
            ("idle", self.idle_timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_some_and(|t| t.is_zero()) {
                return Err(StoreError::InvalidConfiguration(format!(
                    "Redis {name} timeout cannot be Duration::ZERO - use None for no timeout"
                )));
            }
        }

        Ok(())
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct RedisConfig {
    #[envconfig(default = "redis://localhost:6379/")]
    pub redis_url: String,

    pub redis_password: Option<String>,

    pub redis_db: Option<i64>,

    #[envconfig(default = "1")]
    pub redis_pool_size: usize,

    // 0 disables the timeout
    #[envconfig(default = "0")]
    pub redis_dial_timeout_ms: u64,

    #[envconfig(default = "0")]
    pub redis_read_timeout_ms: u64,

    #[envconfig(default = "0")]
    pub redis_write_timeout_ms: u64,

    #[envconfig(default = "0")]
    pub redis_idle_timeout_ms: u64,

    /// Use the pipelined store for proxy-based clusters that reject MULTI/EXEC.
    #[envconfig(default = "false")]
    pub redis_clustered: bool,

    /// Resolve the master through sentinels instead of dialing `REDIS_URL`.
    pub redis_sentinel_master: Option<String>,

    /// Comma separated sentinel addresses.
    #[envconfig(default = "")]
    pub redis_sentinel_addrs: String,
}

fn millis_or_none(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl RedisConfig {
    pub fn options(&self) -> RedisOptions {
        RedisOptions {
            password: self.redis_password.clone().filter(|p| !p.is_empty()),
            db: self.redis_db,
            pool_size: self.redis_pool_size,
            dial_timeout: millis_or_none(self.redis_dial_timeout_ms),
            read_timeout: millis_or_none(self.redis_read_timeout_ms),
            write_timeout: millis_or_none(self.redis_write_timeout_ms),
            idle_timeout: millis_or_none(self.redis_idle_timeout_ms),
        }
    }

    pub fn sentinel_addrs(&self) -> Vec<&str> {
        self.redis_sentinel_addrs
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .collect()
    }

    /// Connect the store variant selected by `REDIS_SENTINEL_MASTER` and
    /// `REDIS_CLUSTERED`.
    pub async fn connect(&self) -> Result<Arc<dyn CacheBackend>, StoreError> {
        let options = self.options();
        if let Some(master) = self.redis_sentinel_master.as_deref().filter(|m| !m.is_empty()) {
            let store = RedisStore::connect_sentinel(master, &self.sentinel_addrs(), options).await?;
            Ok(Arc::new(store))
        } else if self.redis_clustered {
            let store = ClusteredRedisStore::connect(&self.redis_url, options).await?;
            Ok(Arc::new(store))
        } else {
            let store = RedisStore::connect(&self.redis_url, options).await?;
            Ok(Arc::new(store))
        }
    }
}
