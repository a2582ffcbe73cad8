use common_store::CacheBackend;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Named cache backends.
///
/// Built once at startup and then shared read-only. Wrappers look their
/// backend up when they are constructed and keep the `Arc`.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn CacheBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `backend` under `name`, replacing (and returning) any previous one.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        backend: Arc<dyn CacheBackend>,
    ) -> Option<Arc<dyn CacheBackend>> {
        self.backends.insert(name.into(), backend)
    }

    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn CacheBackend>) -> Self {
        self.register(name, backend);
        self
    }

    pub fn try_resolve(&self, name: &str) -> Option<Arc<dyn CacheBackend>> {
        self.backends.get(name).cloned()
    }

    /// Look up a backend that must exist.
    ///
    /// # Panics
    /// If nothing is registered under `name`. This is a wiring mistake, not a
    /// runtime condition.
    pub fn resolve(&self, name: &str) -> Arc<dyn CacheBackend> {
        match self.try_resolve(name) {
            Some(backend) => backend,
            None => panic!(
                "no cache backend registered under {name:?} (registered: {:?})",
                self.names()
            ),
        }
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
