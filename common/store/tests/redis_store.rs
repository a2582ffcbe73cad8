//! Integration tests against a live Redis.
//!
//! Run with `cargo test -p common-store -- --ignored` while Redis listens on
//! localhost:6379. Every test works under its own key prefix.

use chrono::Utc;
use common_store::{
    CacheBackend, CacheValue, ClusteredRedisStore, KeyValueStore, RedisOptions, RedisStore,
};
use std::time::Duration;

const REDIS_URL: &str = "redis://localhost:6379";

async fn store() -> RedisStore {
    RedisStore::connect(REDIS_URL, RedisOptions::new(0, 2, Duration::from_secs(2)))
        .await
        .expect("redis must be reachable on localhost:6379")
}

fn key(prefix: &str, name: &str) -> String {
    format!("common_store_test:{prefix}:{name}")
}

async fn cleanup(store: &RedisStore, prefix: &str) {
    let keys = store.keys(&key(prefix, "*")).await.unwrap();
    store.delete(&keys).await.unwrap();
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_cache_contract_roundtrip() {
    let store = store().await;
    cleanup(&store, "contract").await;
    let a = key("contract", "a");
    let b = key("contract", "b");

    assert!(store.needs_encoding());
    assert!(store.get(&a).await.unwrap().is_none());

    store.set(&a, CacheValue::from("1"), None).await.unwrap();
    let value = store.get(&a).await.unwrap().unwrap();
    assert_eq!(value.as_bytes(), Some(&b"1"[..]));

    let values = store.batch_get(&[a.clone(), b.clone()]).await.unwrap();
    assert!(values[0].is_some());
    assert!(values[1].is_none());

    assert_eq!(store.delete(&[a.clone(), b.clone()]).await.unwrap(), 1);
    assert!(store.set(&a, CacheValue::native(1u8), None).await.is_err());
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_ttl_expires_entries() {
    let store = store().await;
    let k = key("ttl", "short");

    store
        .set(&k, CacheValue::from("v"), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(store.get(&k).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(store.get(&k).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_batch_set_single_node_and_clustered() {
    let single = store().await;
    cleanup(&single, "batch").await;
    let clustered = ClusteredRedisStore::connect(REDIS_URL, RedisOptions::default())
        .await
        .unwrap();

    let pairs = vec![
        (key("batch", "x"), CacheValue::from("1")),
        (key("batch", "y"), CacheValue::from("2")),
    ];
    single
        .batch_set(pairs.clone(), Some(Duration::from_secs(30)))
        .await
        .unwrap();
    clustered
        .batch_set(vec![(key("batch", "z"), CacheValue::from("3"))], None)
        .await
        .unwrap();

    let keys = vec![key("batch", "x"), key("batch", "y"), key("batch", "z")];
    let values = clustered.batch_get(&keys).await.unwrap();
    assert!(values.iter().all(Option::is_some));
    cleanup(&single, "batch").await;
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_scalar_commands() {
    let store = store().await;
    cleanup(&store, "scalar").await;
    let counter = key("scalar", "counter");
    let lock = key("scalar", "lock");

    assert_eq!(store.incr(&counter).await.unwrap(), 1);
    assert_eq!(store.incr(&counter).await.unwrap(), 2);
    assert_eq!(store.exists(&counter).await.unwrap(), 1);

    assert!(store.set_if_absent(&lock, "me", None).await.unwrap());
    assert!(!store.set_if_absent(&lock, "you", None).await.unwrap());
    assert_eq!(
        store.get_and_replace(&lock, "you").await.unwrap().as_deref(),
        Some("me")
    );

    assert!(store.expire(&lock, Duration::from_secs(30)).await.unwrap());
    let later = Utc::now() + chrono::Duration::seconds(30);
    assert!(store.expire_at(&counter, later).await.unwrap());
    assert!(!store
        .expire(&key("scalar", "missing"), Duration::from_secs(1))
        .await
        .unwrap());
    cleanup(&store, "scalar").await;
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_hash_commands() {
    let store = store().await;
    cleanup(&store, "hash").await;
    let h = key("hash", "quiz");

    assert!(store.hset(&h, "title", "capitals").await.unwrap());
    assert!(!store.hset(&h, "title", "rivers").await.unwrap());
    assert_eq!(store.hget(&h, "title").await.unwrap().as_deref(), Some("rivers"));
    assert_eq!(store.hget(&h, "nope").await.unwrap(), None);
    assert_eq!(store.hincr(&h, "plays").await.unwrap(), 1);

    store
        .hset_multiple(
            &h,
            &[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
        )
        .await
        .unwrap();
    assert!(store.hset_multiple(&h, &[]).await.is_err());
    assert!(store.hexists(&h, "a").await.unwrap());
    assert_eq!(store.hdel(&h, "a").await.unwrap(), 1);

    let all = store.hgetall(&h).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.get("b").map(String::as_str), Some("2"));
    cleanup(&store, "hash").await;
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_set_commands() {
    let store = store().await;
    cleanup(&store, "set").await;
    let s = key("set", "tags");

    let members = vec!["geo".to_string(), "easy".to_string(), "geo".to_string()];
    assert_eq!(store.sadd(&s, &members).await.unwrap(), 2);
    assert!(store.sismember(&s, "geo").await.unwrap());
    assert_eq!(store.srem(&s, &["geo".to_string()]).await.unwrap(), 1);
    assert_eq!(store.smembers(&s).await.unwrap(), vec!["easy".to_string()]);
    cleanup(&store, "set").await;
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_list_commands() {
    let store = store().await;
    cleanup(&store, "list").await;
    let q = key("list", "queue");
    let done = key("list", "done");

    let values: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(store.rpush(&q, &values).await.unwrap(), 3);
    assert_eq!(store.lpush(&q, &["z".to_string()]).await.unwrap(), 4);
    assert_eq!(store.llen(&q).await.unwrap(), 4);
    assert_eq!(store.lindex(&q, 0).await.unwrap().as_deref(), Some("z"));
    assert_eq!(
        store.lrange(&q, 1, -1).await.unwrap(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );

    assert_eq!(store.lpop(&q).await.unwrap().as_deref(), Some("z"));
    assert_eq!(store.rpop(&q).await.unwrap().as_deref(), Some("c"));
    assert_eq!(store.rpoplpush(&q, &done).await.unwrap().as_deref(), Some("b"));
    assert_eq!(store.lrem(&q, 0, "a").await.unwrap(), 1);

    let timeout = Duration::from_millis(100);
    assert_eq!(store.blpop(&q, timeout).await.unwrap(), None);
    assert_eq!(store.brpop(&q, timeout).await.unwrap(), None);
    assert_eq!(
        store.brpoplpush(&done, &q, timeout).await.unwrap().as_deref(),
        Some("b")
    );
    assert_eq!(store.blpop(&q, timeout).await.unwrap().as_deref(), Some("b"));
    cleanup(&store, "list").await;
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_bit_commands() {
    let store = store().await;
    cleanup(&store, "bits").await;
    let b = key("bits", "seen");

    assert!(!store.setbit(&b, 7, true).await.unwrap());
    assert!(store.setbit(&b, 7, true).await.unwrap());
    store.setbit(&b, 100, true).await.unwrap();
    assert!(store.getbit(&b, 100).await.unwrap());
    assert!(!store.getbit(&b, 3).await.unwrap());
    assert_eq!(store.bitcount(&b).await.unwrap(), 2);
    cleanup(&store, "bits").await;
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_scan_all_matches_keys() {
    let store = store().await;
    cleanup(&store, "scan").await;

    let pairs: Vec<(String, CacheValue)> = (0..250)
        .map(|i| (key("scan", &i.to_string()), CacheValue::from("x")))
        .collect();
    store.batch_set(pairs, None).await.unwrap();

    let pattern = key("scan", "*");
    let mut scanned = store.scan_all(&pattern).await.unwrap();
    let mut listed = store.keys(&pattern).await.unwrap();
    scanned.sort();
    listed.sort();
    assert_eq!(scanned.len(), 250);
    assert_eq!(scanned, listed);
    cleanup(&store, "scan").await;
}

#[tokio::test]
#[ignore = "requires redis at localhost:6379"]
async fn test_eval() {
    let store = store().await;
    let k = key("eval", "greeting");

    let result = store
        .eval(
            "redis.call('SET', KEYS[1], ARGV[1]); return redis.call('GET', KEYS[1])",
            &[k.clone()],
            &["hello".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(result.as_deref(), Some("hello"));

    let nil = store.eval("return nil", &[], &[]).await.unwrap();
    assert_eq!(nil, None);
    store.delete(&[k]).await.unwrap();
}
