//! Read-through cache for admin projections and memoized embeddings.
//!
//! Values are stored as JSON strings with no expiry; every write path that
//! mutates a cached entity removes its key.

use crate::content_store::{ContentRef, ContentType};
use crate::server::metrics;
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    namespace: &'static str,
}

fn content_segment(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Post => "posts",
        ContentType::Comment => "comments",
        ContentType::JobPosting => "job-postings",
        ContentType::Skill => "skills",
        ContentType::Profile => "profiles",
        ContentType::Message => "messages",
        ContentType::Video => "videos",
        ContentType::Image => "images",
        ContentType::File => "files",
    }
}

impl CacheKey {
    /// `admin:{kind}:{id}`
    pub fn content(target: &ContentRef) -> Self {
        let segment = content_segment(target.content_type);
        Self {
            key: format!("admin:{}:{}", segment, target.content_id),
            namespace: segment,
        }
    }

    pub fn report(report_id: &str) -> Self {
        Self {
            key: format!("admin:moderation-reports:{}", report_id),
            namespace: "moderation-reports",
        }
    }

    pub fn all_reports() -> Self {
        Self {
            key: "admin:moderation-reports:all".to_string(),
            namespace: "moderation-reports",
        }
    }

    pub fn embedding(text: &str) -> Self {
        Self {
            key: format!("Embedding:{}", text),
            namespace: "embedding",
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Raw key/value backend.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    /// Returns whether an entry was present.
    fn remove(&self, key: &str) -> bool;
}

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.write().unwrap().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.write().unwrap().remove(key).is_some()
    }
}

/// Typed view over a [`CacheStore`].
#[derive(Clone)]
pub struct ProjectionCache {
    store: Arc<dyn CacheStore>,
}

impl ProjectionCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// Returns the cached value, or builds it with `factory` and caches it.
    /// Factory errors are returned without caching anything.
    pub fn get_or_create<T, F>(&self, key: &CacheKey, factory: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = factory()?;
        self.set(key, &value);
        Ok(value)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let hit = self.store.get(key.as_str()).and_then(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| warn!("Dropping undecodable cache entry {}: {}", key, e))
                .ok()
        });
        metrics::record_cache_lookup(key.namespace(), hit.is_some());
        hit
    }

    pub fn set<T: Serialize>(&self, key: &CacheKey, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.store.set(key.as_str(), raw),
            Err(e) => warn!("Failed to serialize cache entry {}: {}", key, e),
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        debug!("Invalidating cache key {}", key);
        self.store.remove(key.as_str());
        metrics::record_cache_invalidation(key.namespace());
    }
}
