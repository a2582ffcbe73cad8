use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::{CacheBackend, StoreError};

/// Keys requested per SCAN round. Slower than KEYS but never blocks the server for long.
pub const SCAN_BATCH_SIZE: usize = 100;

/// Millisecond TTL as sent with PX/PEXPIRE. Sub-millisecond TTLs round up to 1ms,
/// since Redis rejects a zero expiry.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Scalar, hash, set, list, bit and key-enumeration commands of a Redis
/// compatible store, on top of the cache contract.
///
/// Implementors only provide a connection; every command has a default body.
/// Values are strings here and "not found" is `None` or an empty collection.
#[async_trait]
pub trait KeyValueStore: CacheBackend {
    /// A connection to run the next command on. Multiplexed connections are
    /// cheap to clone.
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError>;

    /// A dedicated connection for a command that blocks server-side for up to
    /// `timeout`. Its response timeout must outlast the wait, and it must not
    /// be shared with other commands, which would queue behind the wait.
    async fn blocking_connection(
        &self,
        timeout: Duration,
    ) -> Result<MultiplexedConnection, StoreError>;

    /// Returns 1 if the key exists, 0 otherwise.
    async fn exists(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.exists(key).await?)
    }

    /// Increment by one and return the new value.
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.incr(key, 1).await?)
    }

    /// Returns `false` if the key was already set.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        let mut conn = self.connection().await?;
        let result: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(result.is_some())
    }

    /// Replace the value and return the previous one.
    async fn get_and_replace(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let previous: Option<String> = redis::cmd("GETSET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(previous)
    }

    /// Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let updated: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated)
    }

    async fn expire_at(&self, key: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let updated: bool = redis::cmd("PEXPIREAT")
            .arg(key)
            .arg(at.timestamp_millis())
            .query_async(&mut conn)
            .await?;
        Ok(updated)
    }

    // HashMap

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.hget(key, field).await?)
    }

    /// Returns `true` if the field is new.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let added: u64 = conn.hset(key, field, value).await?;
        Ok(added > 0)
    }

    async fn hset_multiple(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "no fields given for hash {key}"
            )));
        }

        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }

        let mut conn = self.connection().await?;
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.hdel(key, field).await?)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.hexists(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.hgetall(key).await?)
    }

    /// Increment the field by one and return the new value.
    async fn hincr(&self, key: &str, field: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.hincr(key, field, 1).await?)
    }

    // Set

    /// Returns how many members were not already in the set.
    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        Ok(conn.sadd(key, members).await?)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        Ok(conn.srem(key, members).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.smembers(key).await?)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.sismember(key, member).await?)
    }

    // Queue/List

    /// Returns the length of the list after the push.
    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64, StoreError> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        let mut conn = self.connection().await?;
        Ok(conn.lpush(key, values).await?)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, StoreError> {
        if values.is_empty() {
            return self.llen(key).await;
        }
        let mut conn = self.connection().await?;
        Ok(conn.rpush(key, values).await?)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("LPOP").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("RPOP").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn rpoplpush(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("RPOPLPUSH")
            .arg(source)
            .arg(destination)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    /// Blocks up to `timeout` and returns `None` when nothing arrived in time.
    ///
    /// A zero timeout blocks indefinitely.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let mut conn = self.blocking_connection(timeout).await?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    /// See [`KeyValueStore::blpop`].
    async fn brpop(&self, key: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let mut conn = self.blocking_connection(timeout).await?;
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.blocking_connection(timeout).await?;
        let value: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(source)
            .arg(destination)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    /// Remove up to `count` occurrences of `value`, all of them when `count` is 0.
    /// A negative count removes from the tail.
    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let removed: u64 = redis::cmd("LREM")
            .arg(key)
            .arg(count)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(key).await?)
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("LINDEX")
            .arg(key)
            .arg(index)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    // Bits

    /// Returns the previous bit.
    async fn setbit(&self, key: &str, offset: u64, value: bool) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let previous: bool = redis::cmd("SETBIT")
            .arg(key)
            .arg(offset)
            .arg(u8::from(value))
            .query_async(&mut conn)
            .await?;
        Ok(previous)
    }

    async fn getbit(&self, key: &str, offset: u64) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let bit: bool = redis::cmd("GETBIT")
            .arg(key)
            .arg(offset)
            .query_async(&mut conn)
            .await?;
        Ok(bit)
    }

    async fn bitcount(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let count: u64 = redis::cmd("BITCOUNT").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    // Keys

    /// Server-side pattern match. Blocks the server on large keyspaces, prefer `scan_all`.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.keys(pattern).await?)
    }

    /// Same keys as [`KeyValueStore::keys`], fetched in SCAN rounds of
    /// [`SCAN_BATCH_SIZE`]. Keys come back once each, in the order first seen.
    async fn scan_all(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut conn)
                .await?;

            for key in batch {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }

            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    /// Run a Lua script. Integer replies come back as their decimal string.
    async fn eval(
        &self,
        script: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let result: Option<String> = redis::cmd("EVAL")
            .arg(script)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut conn)
            .await?;
        Ok(result)
    }
}
