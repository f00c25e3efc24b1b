//! Cache-Backed Registry
//!
//! A [`Registry`] that wraps a backing registry: reads go through the
//! [`ReadThroughCache`], mutations are bracketed by the
//! [`InvalidationInterceptor`], and everything else is forwarded as-is.

use crate::cache::invalidation::{InvalidationInterceptor, Mutation};
use crate::cache::key::KeyBuilder;
use crate::cache::mount::{ConnectionDescriptor, MountTable};
use crate::cache::read_through::ReadThroughCache;
use crate::cache::storage::{CachePartitions, CacheStoreRef};
use crate::config::{CacheConfig, NoCacheRules};
use crate::domain::{
    Association, AuthorizerRef, Comment, Registry, RegistryRef, RequestContext, Resource, TenantId,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Registry façade that caches reads of a backing registry
pub struct CacheBackedRegistry {
    inner: RegistryRef,
    reads: ReadThroughCache,
    invalidation: InvalidationInterceptor,
    store: CacheStoreRef,
    keys: Arc<KeyBuilder>,
    post_write_purge: bool,
}

impl CacheBackedRegistry {
    /// Wrap `inner`, caching into `store`
    pub fn new(
        inner: RegistryRef,
        authorizer: AuthorizerRef,
        store: CacheStoreRef,
        config: &CacheConfig,
    ) -> Result<Self> {
        Self::build(inner, authorizer, store, config, None)
    }

    /// Wrap `inner`, caching into the configured partition of `partitions`
    pub fn in_partition(
        inner: RegistryRef,
        authorizer: AuthorizerRef,
        partitions: &CachePartitions,
        config: &CacheConfig,
    ) -> Result<Self> {
        let store = partitions.get_or_create(&config.partition);
        Self::build(inner, authorizer, store, config, None)
    }

    /// Like [`CacheBackedRegistry::new`], with every key bound to `tenant`
    /// whatever the request context says
    pub fn for_tenant(
        inner: RegistryRef,
        authorizer: AuthorizerRef,
        store: CacheStoreRef,
        config: &CacheConfig,
        tenant: TenantId,
    ) -> Result<Self> {
        Self::build(inner, authorizer, store, config, Some(tenant))
    }

    fn build(
        inner: RegistryRef,
        authorizer: AuthorizerRef,
        store: CacheStoreRef,
        config: &CacheConfig,
        bound_tenant: Option<TenantId>,
    ) -> Result<Self> {
        config.validate()?;

        let default_identity = config
            .default_database
            .as_ref()
            .map(|db| ConnectionDescriptor::from(db).identity())
            .unwrap_or_default();

        let mut keys = KeyBuilder::new(
            Arc::new(MountTable::from_config(config)),
            default_identity,
            config.node_identifier.clone(),
        );
        if let Some(tenant) = bound_tenant {
            keys = keys.with_bound_tenant(tenant);
        }
        let keys = Arc::new(keys);
        let no_cache = Arc::new(NoCacheRules::new(&config.no_cache_paths)?);

        let reads = ReadThroughCache::new(
            inner.clone(),
            authorizer,
            store.clone(),
            keys.clone(),
            no_cache,
        )
        .with_stale_populate_guard(config.reject_stale_populates);
        let invalidation =
            InvalidationInterceptor::new(store.clone(), keys.clone(), config.ancestor_purge);

        info!(
            partition = %store.name(),
            mounts = keys.mounts().len(),
            no_cache = config.no_cache_paths.len(),
            "Cache-backed registry ready"
        );

        Ok(Self {
            inner,
            reads,
            invalidation,
            store,
            keys,
            post_write_purge: config.reject_stale_populates,
        })
    }

    /// The Cache Store this registry caches into
    pub fn store(&self) -> &CacheStoreRef {
        &self.store
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Hit rate of this registry's partition
    pub fn hit_rate(&self) -> f64 {
        self.store.metrics().hit_rate()
    }
}

#[async_trait]
impl Registry for CacheBackedRegistry {
    async fn get(&self, ctx: &RequestContext, path: &str) -> Result<Resource> {
        self.reads.get_resource(ctx, path).await
    }

    async fn get_paged(
        &self,
        ctx: &RequestContext,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> Result<Resource> {
        self.reads.get_collection(ctx, path, start, page_size).await
    }

    async fn resource_exists(&self, ctx: &RequestContext, path: &str) -> Result<bool> {
        self.reads.resource_exists(ctx, path).await
    }

    async fn get_metadata(&self, ctx: &RequestContext, path: &str) -> Result<Resource> {
        self.inner.get_metadata(ctx, path).await
    }

    async fn put(&self, ctx: &RequestContext, path: &str, resource: Resource) -> Result<String> {
        let mutation = Mutation::put(path, &resource);
        self.invalidation
            .around(ctx, &mutation, self.post_write_purge, || {
                self.inner.put(ctx, path, resource)
            })
            .await
    }

    async fn import_resource(
        &self,
        ctx: &RequestContext,
        suggested_path: &str,
        source_url: &str,
        resource: Resource,
    ) -> Result<String> {
        let mutation = Mutation::Import {
            path: suggested_path,
        };
        self.invalidation
            .around(ctx, &mutation, self.post_write_purge, || {
                self.inner
                    .import_resource(ctx, suggested_path, source_url, resource)
            })
            .await
    }

    async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        self.invalidation
            .around(ctx, &Mutation::Delete { path }, self.post_write_purge, || {
                self.inner.delete(ctx, path)
            })
            .await
    }

    async fn rename(&self, ctx: &RequestContext, current_path: &str, new_name: &str) -> Result<String> {
        let mutation = Mutation::Rename {
            path: current_path,
            new_name,
        };
        self.invalidation
            .around(ctx, &mutation, self.post_write_purge, || {
                self.inner.rename(ctx, current_path, new_name)
            })
            .await
    }

    async fn move_resource(
        &self,
        ctx: &RequestContext,
        current_path: &str,
        new_path: &str,
    ) -> Result<String> {
        let mutation = Mutation::Move {
            source: current_path,
            target: new_path,
        };
        self.invalidation
            .around(ctx, &mutation, self.post_write_purge, || {
                self.inner.move_resource(ctx, current_path, new_path)
            })
            .await
    }

    async fn copy(&self, ctx: &RequestContext, source_path: &str, target_path: &str) -> Result<String> {
        let mutation = Mutation::Copy {
            source: source_path,
            target: target_path,
        };
        self.invalidation
            .around(ctx, &mutation, self.post_write_purge, || {
                self.inner.copy(ctx, source_path, target_path)
            })
            .await
    }

    async fn create_link(&self, ctx: &RequestContext, path: &str, target: &str) -> Result<()> {
        self.invalidation
            .around(ctx, &Mutation::CreateLink { path }, self.post_write_purge, || {
                self.inner.create_link(ctx, path, target)
            })
            .await
    }

    async fn remove_link(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        self.invalidation
            .around(ctx, &Mutation::RemoveLink { path }, self.post_write_purge, || {
                self.inner.remove_link(ctx, path)
            })
            .await
    }

    async fn restore(&self, ctx: &RequestContext, path: &str, dump: &str) -> Result<()> {
        self.invalidation
            .around(ctx, &Mutation::Restore { path }, self.post_write_purge, || {
                self.inner.restore(ctx, path, dump)
            })
            .await
    }

    async fn dump(&self, ctx: &RequestContext, path: &str) -> Result<String> {
        self.inner.dump(ctx, path).await
    }

    async fn create_version(&self, ctx: &RequestContext, path: &str) -> Result<()> {
        self.inner.create_version(ctx, path).await
    }

    async fn get_versions(&self, ctx: &RequestContext, path: &str) -> Result<Vec<String>> {
        self.inner.get_versions(ctx, path).await
    }

    async fn restore_version(&self, ctx: &RequestContext, version_path: &str) -> Result<()> {
        self.invalidation
            .around(
                ctx,
                &Mutation::RestoreVersion { version_path },
                self.post_write_purge,
                || self.inner.restore_version(ctx, version_path),
            )
            .await
    }

    async fn add_association(
        &self,
        ctx: &RequestContext,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> Result<()> {
        self.inner
            .add_association(ctx, source_path, target_path, association_type)
            .await
    }

    async fn remove_association(
        &self,
        ctx: &RequestContext,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> Result<()> {
        self.inner
            .remove_association(ctx, source_path, target_path, association_type)
            .await
    }

    async fn get_associations(&self, ctx: &RequestContext, path: &str) -> Result<Vec<Association>> {
        self.inner.get_associations(ctx, path).await
    }

    async fn apply_tag(&self, ctx: &RequestContext, path: &str, tag: &str) -> Result<()> {
        self.inner.apply_tag(ctx, path, tag).await
    }

    async fn remove_tag(&self, ctx: &RequestContext, path: &str, tag: &str) -> Result<()> {
        self.inner.remove_tag(ctx, path, tag).await
    }

    async fn get_tags(&self, ctx: &RequestContext, path: &str) -> Result<Vec<String>> {
        self.inner.get_tags(ctx, path).await
    }

    async fn add_comment(&self, ctx: &RequestContext, path: &str, text: &str) -> Result<String> {
        self.inner.add_comment(ctx, path, text).await
    }

    async fn get_comments(&self, ctx: &RequestContext, path: &str) -> Result<Vec<Comment>> {
        self.inner.get_comments(ctx, path).await
    }

    async fn rate_resource(&self, ctx: &RequestContext, path: &str, rating: u8) -> Result<()> {
        self.inner.rate_resource(ctx, path, rating).await
    }

    async fn get_average_rating(&self, ctx: &RequestContext, path: &str) -> Result<f32> {
        self.inner.get_average_rating(ctx, path).await
    }

    async fn begin_transaction(&self, ctx: &RequestContext) -> Result<()> {
        self.inner.begin_transaction(ctx).await
    }

    async fn commit_transaction(&self, ctx: &RequestContext) -> Result<()> {
        self.inner.commit_transaction(ctx).await
    }

    async fn rollback_transaction(&self, ctx: &RequestContext) -> Result<()> {
        self.inner.rollback_transaction(ctx).await
    }
}
