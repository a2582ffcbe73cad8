use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{CacheBackend, CacheValue, StoreError};

/// Scriptable backend for tests.
///
/// Entries preloaded with [`MockStore::get_ret`] and entries written through
/// the cache contract are served back by `get`/`batch_get`. Each operation can
/// be made to fail, and every call is recorded. Clones share entries and calls.
#[derive(Clone)]
pub struct MockStore {
    needs_encoding: bool,
    get_error: Option<StoreError>,
    batch_get_error: Option<StoreError>,
    set_error: Option<StoreError>,
    batch_set_error: Option<StoreError>,
    delete_error: Option<StoreError>,
    entries: Arc<Mutex<HashMap<String, CacheValue>>>,
    calls: Arc<Mutex<Vec<MockStoreCall>>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self {
            needs_encoding: true,
            get_error: None,
            batch_get_error: None,
            set_error: None,
            batch_set_error: None,
            delete_error: None,
            entries: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like an in-process store that accepts native values.
    pub fn native_values(&mut self) -> Self {
        self.needs_encoding = false;
        self.clone()
    }

    pub fn get_ret(&mut self, key: &str, value: impl Into<CacheValue>) -> Self {
        lock(&self.entries).insert(key.to_owned(), value.into());
        self.clone()
    }

    pub fn get_error(&mut self, err: StoreError) -> Self {
        self.get_error = Some(err);
        self.clone()
    }

    pub fn batch_get_error(&mut self, err: StoreError) -> Self {
        self.batch_get_error = Some(err);
        self.clone()
    }

    pub fn set_error(&mut self, err: StoreError) -> Self {
        self.set_error = Some(err);
        self.clone()
    }

    pub fn batch_set_error(&mut self, err: StoreError) -> Self {
        self.batch_set_error = Some(err);
        self.clone()
    }

    pub fn delete_error(&mut self, err: StoreError) -> Self {
        self.delete_error = Some(err);
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockStoreCall> {
        lock(&self.calls).clone()
    }

    /// Recorded calls of one operation, e.g. `"batch_set"`.
    pub fn calls_to(&self, op: &str) -> Vec<MockStoreCall> {
        lock(&self.calls)
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    /// What is currently held under `key`, bypassing call recording.
    pub fn stored(&self, key: &str) -> Option<CacheValue> {
        lock(&self.entries).get(key).cloned()
    }

    fn check_encoded(&self, value: &CacheValue) -> Result<(), StoreError> {
        if self.needs_encoding && value.as_bytes().is_none() {
            return Err(StoreError::UnsupportedValue(
                "mock store only accepts bytes".to_string(),
            ));
        }
        Ok(())
    }

    fn record(&self, op: &str, key: String, value: MockStoreValue) {
        lock(&self.calls).push(MockStoreCall {
            op: op.to_string(),
            key,
            value,
        });
    }
}

#[derive(Debug, Clone)]
pub enum MockStoreValue {
    None,
    Keys(Vec<String>),
    Value(CacheValue, Option<Duration>),
    Pairs(Vec<(String, CacheValue)>, Option<Duration>),
}

#[derive(Debug, Clone)]
pub struct MockStoreCall {
    pub op: String,
    pub key: String,
    pub value: MockStoreValue,
}

#[async_trait]
impl CacheBackend for MockStore {
    fn needs_encoding(&self) -> bool {
        self.needs_encoding
    }

    async fn get(&self, key: &str) -> Result<Option<CacheValue>, StoreError> {
        self.record("get", key.to_string(), MockStoreValue::None);

        if let Some(err) = &self.get_error {
            return Err(err.clone());
        }
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, StoreError> {
        self.record(
            "batch_get",
            format!("keys={}", keys.len()),
            MockStoreValue::Keys(keys.to_vec()),
        );

        if let Some(err) = &self.batch_get_error {
            return Err(err.clone());
        }
        let entries = lock(&self.entries);
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.record(
            "set",
            key.to_string(),
            MockStoreValue::Value(value.clone(), ttl),
        );

        if let Some(err) = &self.set_error {
            return Err(err.clone());
        }
        self.check_encoded(&value)?;
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    async fn batch_set(
        &self,
        pairs: Vec<(String, CacheValue)>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.record(
            "batch_set",
            format!("pairs={}", pairs.len()),
            MockStoreValue::Pairs(pairs.clone(), ttl),
        );

        if let Some(err) = &self.batch_set_error {
            return Err(err.clone());
        }
        for (_, value) in &pairs {
            self.check_encoded(value)?;
        }
        let mut entries = lock(&self.entries);
        entries.extend(pairs);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.record(
            "delete",
            format!("keys={}", keys.len()),
            MockStoreValue::Keys(keys.to_vec()),
        );

        if let Some(err) = &self.delete_error {
            return Err(err.clone());
        }
        let mut entries = lock(&self.entries);
        let removed = keys.iter().filter(|key| entries.remove(*key).is_some()).count();
        Ok(removed as u64)
    }
}
