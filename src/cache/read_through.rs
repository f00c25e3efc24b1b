//! Read-Through Cache
//!
//! Serves single-resource reads, paginated collection reads and existence
//! checks from the Cache Store, fetching misses from the backing registry.
//! Concurrent misses for one key are collapsed into a single fetch.

use crate::cache::ghost::GhostResource;
use crate::cache::key::{CacheKey, KeyBuilder, PathTranslation};
use crate::cache::lock::KeyedLocks;
use crate::cache::storage::{CacheStoreRef, CachedResource};
use crate::config::NoCacheRules;
use crate::domain::path;
use crate::domain::{Action, AuthorizerRef, RegistryRef, RequestContext, Resource};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// A read the cache can serve
#[derive(Debug, Clone, Copy)]
enum Read<'a> {
    Resource(&'a str),
    Page {
        path: &'a str,
        start: usize,
        page_size: usize,
    },
}

impl Read<'_> {
    fn path(&self) -> &str {
        match self {
            Read::Resource(path) => path,
            Read::Page { path, .. } => path,
        }
    }

    /// Path the cache key is built from
    fn key_path(&self) -> String {
        match self {
            Read::Resource(path) => path.to_string(),
            Read::Page {
                path,
                start,
                page_size,
            } => path::paginated(path, *start, *page_size),
        }
    }

    /// Whether a fetched value may be stored
    fn is_cacheable(&self, resource: &Resource) -> bool {
        match self {
            Read::Resource(_) => resource.is_cacheable(),
            Read::Page { .. } => !resource.is_link(),
        }
    }
}

/// Read side of the cache
pub struct ReadThroughCache {
    inner: RegistryRef,
    authorizer: AuthorizerRef,
    store: CacheStoreRef,
    keys: Arc<KeyBuilder>,
    no_cache: Arc<NoCacheRules>,
    locks: KeyedLocks,
    reject_stale_populates: bool,
}

impl ReadThroughCache {
    pub fn new(
        inner: RegistryRef,
        authorizer: AuthorizerRef,
        store: CacheStoreRef,
        keys: Arc<KeyBuilder>,
        no_cache: Arc<NoCacheRules>,
    ) -> Self {
        Self {
            inner,
            authorizer,
            store,
            keys,
            no_cache,
            locks: KeyedLocks::new(),
            reject_stale_populates: true,
        }
    }

    /// Toggle the generation check on populates
    pub fn with_stale_populate_guard(mut self, enabled: bool) -> Self {
        self.reject_stale_populates = enabled;
        self
    }

    /// Get a resource, from the cache when possible
    pub async fn get_resource(&self, ctx: &RequestContext, path: &str) -> Result<Resource> {
        self.read(ctx, Read::Resource(path)).await
    }

    /// Get one page of a collection listing, from the cache when possible
    pub async fn get_collection(
        &self,
        ctx: &RequestContext,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> Result<Resource> {
        self.read(
            ctx,
            Read::Page {
                path,
                start,
                page_size,
            },
        )
        .await
    }

    /// Check existence. A cached key proves existence; absence is never
    /// cached.
    pub async fn resource_exists(&self, ctx: &RequestContext, path: &str) -> Result<bool> {
        if self.no_cache.is_no_cache(path) {
            return self.inner.resource_exists(ctx, path).await;
        }

        let key = self.keys.build_key(ctx, path)?;
        match self.store.contains(&key).await {
            Ok(true) => {
                debug!(key = %key, "Existence served from cache");
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache store lookup failed"),
        }

        let generation = self.store.generation();
        if !self.inner.resource_exists(ctx, path).await? {
            return Ok(false);
        }
        self.populate(key, Arc::new(GhostResource::unresolved()), generation)
            .await;
        Ok(true)
    }

    /// Whether reads of `path` skip the cache entirely
    pub fn bypasses_cache(&self, path: &str) -> bool {
        self.no_cache.is_no_cache(path) || path::is_community_feature_request(path)
    }

    /// Number of keys with a fetch in flight
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    async fn read(&self, ctx: &RequestContext, read: Read<'_>) -> Result<Resource> {
        if self.bypasses_cache(read.path()) {
            return self.fetch(ctx, read).await;
        }
        self.authorize(ctx, read.path()).await?;

        let key = self
            .keys
            .resolve(ctx, &read.key_path(), PathTranslation::Mounted)?
            .key();

        if let Some(ghost) = self.cached(&key, true).await {
            return self.resolve_ghost(ctx, read, &key, ghost).await;
        }

        let _guard = self.locks.lock(&key.to_string()).await;

        // Another reader may have populated while we waited
        if let Some(ghost) = self.cached(&key, false).await {
            return self.resolve_ghost(ctx, read, &key, ghost).await;
        }

        let generation = self.store.generation();
        let resource = self.fetch(ctx, read).await?;
        if read.is_cacheable(&resource) {
            self.populate(key, Arc::new(GhostResource::resolved(resource.clone())), generation)
                .await;
        } else {
            debug!(key = %key, "Not caching link");
        }
        Ok(resource)
    }

    /// Serve a cached ghost, fetching content for existence-only ghosts
    async fn resolve_ghost(
        &self,
        ctx: &RequestContext,
        read: Read<'_>,
        key: &CacheKey,
        ghost: CachedResource,
    ) -> Result<Resource> {
        if let Some(resource) = ghost.payload() {
            debug!(key = %key, "Cache hit");
            return Ok(resource.as_ref().clone());
        }

        let resource = self.fetch(ctx, read).await?;
        if read.is_cacheable(&resource) {
            ghost.set_payload(resource.clone());
        } else if let Err(e) = self.store.remove(key).await {
            warn!(key = %key, error = %e, "Failed to drop placeholder for link");
        }
        Ok(resource)
    }

    async fn cached(&self, key: &CacheKey, counted: bool) -> Option<CachedResource> {
        let lookup = if counted {
            self.store.get(key).await
        } else {
            self.store.peek(key).await
        };
        match lookup {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache store lookup failed, reading through");
                None
            }
        }
    }

    async fn populate(&self, key: CacheKey, value: CachedResource, generation: u64) {
        let stored = if self.reject_stale_populates {
            self.store.put_if_generation(key.clone(), value, generation).await
        } else {
            self.store.put(key.clone(), value).await.map(|_| true)
        };
        match stored {
            Ok(true) => debug!(key = %key, "Cache populated"),
            Ok(false) => debug!(key = %key, "Populate skipped, invalidated meanwhile"),
            Err(e) => warn!(key = %key, error = %e, "Cache populate failed"),
        }
    }

    async fn fetch(&self, ctx: &RequestContext, read: Read<'_>) -> Result<Resource> {
        match read {
            Read::Resource(path) => self.inner.get(ctx, path).await,
            Read::Page {
                path,
                start,
                page_size,
            } => self.inner.get_paged(ctx, path, start, page_size).await,
        }
    }

    async fn authorize(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        if self.authorizer.authorize(ctx, path, Action::Get).await? {
            return Ok(());
        }
        warn!(user = %ctx.user, path = %path, "User is not authorized to read the resource");
        Err(Error::AuthorizationFailed {
            user: ctx.user.clone(),
            path: path.to_string(),
            action: Action::Get.to_string(),
        })
    }
}
