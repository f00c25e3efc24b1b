//! Cache Store that fails on demand, for degradation tests

use crate::cache::events::CacheEvent;
use crate::cache::key::{CacheKey, KeyScope};
use crate::cache::metrics::StoreMetrics;
use crate::cache::storage::{CacheStore, CachedResource, MemoryCacheStore, PathMatch};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Memory store whose fallible calls error for one connection, or for all
pub struct FailingCacheStore {
    inner: MemoryCacheStore,
    connection: Option<String>,
}

impl FailingCacheStore {
    /// Every fallible call fails
    pub fn unavailable() -> Self {
        Self {
            inner: MemoryCacheStore::with_defaults("failing"),
            connection: None,
        }
    }

    /// Calls touching keys of `connection` fail, the rest work
    pub fn failing_for(connection: impl Into<String>) -> Self {
        Self {
            inner: MemoryCacheStore::with_defaults("failing"),
            connection: Some(connection.into()),
        }
    }

    /// The working store underneath, for seeding and inspection
    pub fn inner(&self) -> &MemoryCacheStore {
        &self.inner
    }

    fn check(&self, connection: Option<&str>) -> Result<()> {
        match &self.connection {
            Some(failing) if connection != Some(failing.as_str()) => Ok(()),
            _ => Err(Error::CacheStoreUnavailable(format!(
                "{} is down",
                self.inner.name()
            ))),
        }
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResource>> {
        self.check(key.connection_id.as_deref())?;
        self.inner.get(key).await
    }

    async fn peek(&self, key: &CacheKey) -> Result<Option<CachedResource>> {
        self.check(key.connection_id.as_deref())?;
        self.inner.peek(key).await
    }

    async fn put(&self, key: CacheKey, value: CachedResource) -> Result<()> {
        self.check(key.connection_id.as_deref())?;
        self.inner.put(key, value).await
    }

    async fn put_if_generation(
        &self,
        key: CacheKey,
        value: CachedResource,
        generation: u64,
    ) -> Result<bool> {
        self.check(key.connection_id.as_deref())?;
        self.inner.put_if_generation(key, value, generation).await
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.check(key.connection_id.as_deref())?;
        self.inner.remove(key).await
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool> {
        self.check(key.connection_id.as_deref())?;
        self.inner.contains(key).await
    }

    async fn remove_matching(&self, scope: &KeyScope, matcher: &PathMatch) -> Result<Vec<CacheKey>> {
        self.check(scope.connection_id.as_deref())?;
        self.inner.remove_matching(scope, matcher).await
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        self.inner.keys().await
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn clear(&self) -> Result<()> {
        self.check(None)?;
        self.inner.clear().await
    }

    fn generation(&self) -> u64 {
        self.inner.generation()
    }

    fn metrics(&self) -> &StoreMetrics {
        self.inner.metrics()
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.subscribe()
    }
}
