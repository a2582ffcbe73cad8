use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::sentinel::Sentinel;
use redis::{AsyncCommands, AsyncConnectionConfig, Client, ConnectionInfo, IntoConnectionInfo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::kv::ttl_millis;
use crate::{CacheBackend, CacheValue, KeyValueStore, RedisOptions, StoreError};

/// Where new connections are dialed.
enum Endpoint {
    Direct(Client),
    /// The master is looked up on every dial, so re-dials follow a failover.
    Sentinel {
        sentinel: Mutex<Sentinel>,
        master: String,
    },
}

struct PooledConnection {
    connection: MultiplexedConnection,
    last_used: Instant,
}

/// Single-node Redis store.
///
/// Holds `pool_size` multiplexed connections and rotates commands across
/// them. Multi-key writes run as one MULTI/EXEC transaction. Blocking list
/// pops get a connection of their own.
pub struct RedisStore {
    endpoint: Endpoint,
    options: RedisOptions,
    pool: Vec<Mutex<PooledConnection>>,
    next: AtomicUsize,
}

fn parse_addr(addr: &str) -> Result<ConnectionInfo, StoreError> {
    if addr.contains("://") {
        Ok(addr.into_connection_info()?)
    } else {
        Ok(format!("redis://{addr}").into_connection_info()?)
    }
}

/// Password and database index from `options` take precedence.
fn apply_options(info: &mut ConnectionInfo, options: &RedisOptions) {
    if let Some(password) = &options.password {
        info.redis.password = Some(password.clone());
    }
    if let Some(db) = options.db {
        info.redis.db = db;
    }
}

impl RedisStore {
    /// Connect to `addr` and PING once so a bad address or credential fails here.
    ///
    /// `addr` is a `redis://` URL or a bare `host:port`. Password and database
    /// index from `options` take precedence over the ones in the URL.
    ///
    /// # Errors
    /// Returns `StoreError::InvalidConfiguration` for a zero pool size or a
    /// `Some(Duration::ZERO)` timeout, and the connection error otherwise.
    ///
    /// # Examples
    /// ```no_run
    /// use common_store::{RedisOptions, RedisStore};
    /// use std::time::Duration;
    ///
    /// # async fn example() {
    /// let store = RedisStore::connect(
    ///     "redis://localhost:6379",
    ///     RedisOptions::new(0, 4, Duration::from_millis(200)),
    /// )
    /// .await
    /// .unwrap();
    /// # }
    /// ```
    pub async fn connect(addr: &str, options: RedisOptions) -> Result<RedisStore, StoreError> {
        options.validate()?;

        let mut info = parse_addr(addr)?;
        apply_options(&mut info, &options);
        let client = Client::open(info)?;

        Self::open(Endpoint::Direct(client), options).await
    }

    /// Connect to the master that the sentinels at `sentinels` report for
    /// `master`. The sentinels are asked again whenever a connection is
    /// re-dialed, so an idle timeout lets the pool move to a promoted master.
    ///
    /// `options` apply to the master connections; the sentinels are dialed
    /// with whatever their addresses carry.
    pub async fn connect_sentinel(
        master: &str,
        sentinels: &[&str],
        options: RedisOptions,
    ) -> Result<RedisStore, StoreError> {
        options.validate()?;
        if sentinels.is_empty() {
            return Err(StoreError::InvalidConfiguration(
                "At least one sentinel address is required".to_string(),
            ));
        }

        let infos = sentinels
            .iter()
            .map(|addr| parse_addr(addr))
            .collect::<Result<Vec<_>, _>>()?;
        let endpoint = Endpoint::Sentinel {
            sentinel: Mutex::new(Sentinel::build(infos)?),
            master: master.to_string(),
        };

        Self::open(endpoint, options).await
    }

    async fn open(endpoint: Endpoint, options: RedisOptions) -> Result<RedisStore, StoreError> {
        let pool_size = options.pool_size;
        let mut store = RedisStore {
            endpoint,
            options,
            pool: Vec::with_capacity(pool_size),
            next: AtomicUsize::new(0),
        };

        for _ in 0..pool_size {
            let connection = store.dial(store.options.response_timeout()).await?;
            store.pool.push(Mutex::new(PooledConnection {
                connection,
                last_used: Instant::now(),
            }));
        }
        store.ping().await?;

        debug!(pool_size, "connected to redis");
        Ok(store)
    }

    async fn client(&self) -> Result<Client, StoreError> {
        match &self.endpoint {
            Endpoint::Direct(client) => Ok(client.clone()),
            Endpoint::Sentinel { sentinel, master } => {
                let resolved = sentinel.lock().await.async_master_for(master, None).await?;
                let mut info = resolved.get_connection_info().clone();
                apply_options(&mut info, &self.options);
                Ok(Client::open(info)?)
            }
        }
    }

    async fn dial(
        &self,
        response_timeout: Option<Duration>,
    ) -> Result<MultiplexedConnection, StoreError> {
        let mut config = AsyncConnectionConfig::new();
        if let Some(timeout) = self.options.dial_timeout {
            config = config.set_connection_timeout(timeout);
        }
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }

        let client = self.client().await?;
        Ok(client
            .get_multiplexed_async_connection_with_config(&config)
            .await?)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }
}

pub(crate) async fn get_bytes(
    mut conn: MultiplexedConnection,
    key: &str,
) -> Result<Option<CacheValue>, StoreError> {
    let bytes: Option<Vec<u8>> = conn.get(key).await?;
    Ok(bytes.map(CacheValue::Bytes))
}

pub(crate) async fn batch_get_bytes(
    mut conn: MultiplexedConnection,
    keys: &[String],
) -> Result<Vec<Option<CacheValue>>, StoreError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
    Ok(values
        .into_iter()
        .map(|value| value.map(CacheValue::Bytes))
        .collect())
}

pub(crate) async fn set_bytes(
    mut conn: MultiplexedConnection,
    key: &str,
    value: CacheValue,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let bytes = value.into_bytes()?;
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(bytes);
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    cmd.query_async::<()>(&mut conn).await?;
    Ok(())
}

/// Write every pair (and its expiry) in one round trip. With `atomic` the
/// pipeline is wrapped in MULTI/EXEC.
pub(crate) async fn batch_set_bytes(
    mut conn: MultiplexedConnection,
    pairs: Vec<(String, CacheValue)>,
    ttl: Option<Duration>,
    atomic: bool,
) -> Result<(), StoreError> {
    if pairs.is_empty() {
        return Ok(());
    }

    let mut pipe = redis::pipe();
    if atomic {
        pipe.atomic();
    }
    for (key, value) in pairs {
        let bytes = value.into_bytes()?;
        let cmd = pipe.cmd("SET").arg(&key).arg(bytes);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.ignore();
    }

    pipe.query_async::<()>(&mut conn).await?;
    Ok(())
}

pub(crate) async fn delete_keys(
    mut conn: MultiplexedConnection,
    keys: &[String],
) -> Result<u64, StoreError> {
    if keys.is_empty() {
        return Ok(0);
    }
    Ok(conn.del(keys).await?)
}

#[async_trait]
impl CacheBackend for RedisStore {
    fn needs_encoding(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError> {
        get_bytes(self.connection().await?, key).await
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, StoreError> {
        batch_get_bytes(self.connection().await?, keys).await
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        set_bytes(self.connection().await?, key, value, ttl).await
    }

    async fn batch_set(
        &self,
        pairs: Vec<(String, CacheValue)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        batch_set_bytes(self.connection().await?, pairs, ttl, true).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        delete_keys(self.connection().await?, keys).await
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        let mut slot = self.pool[index].lock().await;

        if let Some(idle_timeout) = self.options.idle_timeout {
            if slot.last_used.elapsed() >= idle_timeout {
                debug!(slot = index, "re-dialing idle redis connection");
                slot.connection = self.dial(self.options.response_timeout()).await?;
            }
        }

        slot.last_used = Instant::now();
        Ok(slot.connection.clone())
    }

    async fn blocking_connection(
        &self,
        timeout: Duration,
    ) -> Result<MultiplexedConnection, StoreError> {
        self.dial(self.options.blocking_response_timeout(timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Minimal RESP server. Blocking pops wait out their timeout and reply
    /// nil. It also answers as a sentinel that reports itself as the master
    /// `mymaster`.
    struct FakeRedis {
        addr: String,
        accepted: Arc<AtomicUsize>,
    }

    impl FakeRedis {
        async fn start() -> FakeRedis {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let accepted = Arc::new(AtomicUsize::new(0));

            let counter = accepted.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(socket, port));
                }
            });

            FakeRedis {
                addr: format!("127.0.0.1:{port}"),
                accepted,
            }
        }

        fn url(&self) -> String {
            format!("redis://{}", self.addr)
        }

        fn accepted(&self) -> usize {
            self.accepted.load(Ordering::SeqCst)
        }
    }

    fn read_line(buf: &[u8], pos: usize) -> Option<(&str, usize)> {
        let end = buf[pos..].windows(2).position(|w| w == b"\r\n")? + pos;
        Some((std::str::from_utf8(&buf[pos..end]).ok()?, end + 2))
    }

    fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
        let (header, mut pos) = read_line(buf, 0)?;
        let count: usize = header.strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let (len, start) = read_line(buf, pos)?;
            let len: usize = len.strip_prefix('$')?.parse().ok()?;
            let end = start + len;
            if buf.len() < end + 2 {
                return None;
            }
            args.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
            pos = end + 2;
        }
        Some((args, pos))
    }

    fn bulk_array(items: &[&str]) -> String {
        let mut reply = format!("*{}\r\n", items.len());
        for item in items {
            reply.push_str(&format!("${}\r\n{}\r\n", item.len(), item));
        }
        reply
    }

    async fn reply_to(args: &[String], port: u16) -> String {
        let name = args.first().map(|a| a.to_ascii_uppercase()).unwrap_or_default();
        let wait = || {
            let secs: f64 = args.last().and_then(|a| a.parse().ok()).unwrap_or(0.0);
            tokio::time::sleep(Duration::from_secs_f64(secs))
        };
        match name.as_str() {
            "PING" => "+PONG\r\n".to_string(),
            "BLPOP" | "BRPOP" => {
                wait().await;
                "*-1\r\n".to_string()
            }
            "BRPOPLPUSH" => {
                wait().await;
                "$-1\r\n".to_string()
            }
            "ROLE" => "*3\r\n$6\r\nmaster\r\n:0\r\n*0\r\n".to_string(),
            "SENTINEL" => {
                let port = port.to_string();
                let master = bulk_array(&[
                    "name", "mymaster", "ip", "127.0.0.1", "port", port.as_str(), "flags", "master",
                ]);
                format!("*1\r\n{master}")
            }
            _ => "+OK\r\n".to_string(),
        }
    }

    async fn serve(mut socket: TcpStream, port: u16) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            while let Some((args, used)) = parse_command(&buf) {
                buf.drain(..used);
                let reply = reply_to(&args, port).await;
                if socket.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    #[tokio::test]
    async fn test_blocking_pops_outlast_the_response_timeout() {
        let server = FakeRedis::start().await;
        let options = RedisOptions::new(0, 1, Duration::from_millis(200));
        let store = RedisStore::connect(&server.url(), options).await.unwrap();
        let wait = Duration::from_millis(500);

        let popped = store.blpop("queue", wait).await;
        assert!(matches!(popped, Ok(None)), "blpop: {popped:?}");

        let popped = store.brpop("queue", wait).await;
        assert!(matches!(popped, Ok(None)), "brpop: {popped:?}");

        let popped = store.brpoplpush("queue", "done", wait).await;
        assert!(matches!(popped, Ok(None)), "brpoplpush: {popped:?}");

        // Pooled connections keep serving while nothing blocks them
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_connections_are_redialed() {
        let server = FakeRedis::start().await;
        let options = RedisOptions::new(0, 1, Duration::from_secs(1))
            .with_idle_timeout(Duration::from_millis(50));
        let store = RedisStore::connect(&server.url(), options).await.unwrap();
        assert_eq!(server.accepted(), 1);

        store.ping().await.unwrap();
        assert_eq!(server.accepted(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        store.ping().await.unwrap();
        assert_eq!(server.accepted(), 2);
    }

    #[tokio::test]
    async fn test_connections_are_kept_without_idle_timeout() {
        let server = FakeRedis::start().await;
        let options = RedisOptions::new(0, 2, Duration::from_secs(1));
        let store = RedisStore::connect(&server.addr, options).await.unwrap();
        assert_eq!(store.pool_size(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        for _ in 0..4 {
            store.ping().await.unwrap();
        }
        assert_eq!(server.accepted(), 2);
    }

    #[tokio::test]
    async fn test_connect_sentinel_resolves_master() {
        let server = FakeRedis::start().await;
        let options = RedisOptions::new(0, 1, Duration::from_secs(1));
        let store = RedisStore::connect_sentinel("mymaster", &[server.addr.as_str()], options)
            .await
            .unwrap();

        store.ping().await.unwrap();
        let popped = store.blpop("queue", Duration::from_millis(10)).await;
        assert!(matches!(popped, Ok(None)), "blpop: {popped:?}");
    }

    #[tokio::test]
    async fn test_connect_sentinel_unknown_master_fails() {
        let server = FakeRedis::start().await;
        let result =
            RedisStore::connect_sentinel("other", &[server.addr.as_str()], RedisOptions::default())
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_sentinel_requires_addresses() {
        let result = RedisStore::connect_sentinel("mymaster", &[], RedisOptions::default()).await;
        assert!(matches!(
            result,
            Err(StoreError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_pool_size_returns_error() {
        let options = RedisOptions {
            pool_size: 0,
            ..Default::default()
        };
        let result = RedisStore::connect("redis://localhost:6379", options).await;

        assert!(matches!(
            result,
            Err(StoreError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_read_timeout_returns_error() {
        let options = RedisOptions {
            read_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        let result = RedisStore::connect("localhost:6379", options).await;

        if let Err(StoreError::InvalidConfiguration(msg)) = result {
            assert!(msg.contains("read timeout"));
        } else {
            panic!("expected an invalid configuration error");
        }
    }

    #[tokio::test]
    async fn test_zero_dial_timeout_returns_error() {
        let options = RedisOptions {
            dial_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        let result = RedisStore::connect("localhost:6379", options).await;

        assert!(matches!(
            result,
            Err(StoreError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_connecting() {
        let result = RedisStore::connect("ftp://localhost:6379", RedisOptions::default()).await;

        match result {
            Err(err) => assert!(err.is_unrecoverable_error()),
            Ok(_) => panic!("an ftp url must not connect"),
        }
    }
}
