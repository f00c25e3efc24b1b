//! Write Invalidation
//!
//! Purges every cache entry a mutating registry call can make stale: the
//! written path, its paginated listings, its subtree when recursive, and
//! the listings of its ancestors. Invalidation never fails the write it
//! guards; purge errors are logged and swallowed.

use crate::cache::key::{KeyBuilder, KeyScope, PathTranslation, ResolvedPath};
use crate::cache::storage::{CacheStoreRef, PathMatch};
use crate::config::AncestorPurge;
use crate::domain::path;
use crate::domain::{RequestContext, Resource, TenantId};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Mutations
// =============================================================================

/// A mutating registry operation, reduced to what invalidation needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<'a> {
    Put {
        path: &'a str,
        /// Real location of the content when the written resource is a link
        link_real_path: Option<String>,
    },
    Import {
        path: &'a str,
    },
    Delete {
        path: &'a str,
    },
    Move {
        source: &'a str,
        target: &'a str,
    },
    Copy {
        source: &'a str,
        target: &'a str,
    },
    Rename {
        path: &'a str,
        new_name: &'a str,
    },
    CreateLink {
        path: &'a str,
    },
    RemoveLink {
        path: &'a str,
    },
    Restore {
        path: &'a str,
    },
    RestoreVersion {
        version_path: &'a str,
    },
}

impl<'a> Mutation<'a> {
    /// Put of `resource` at `path`
    pub fn put(path: &'a str, resource: &Resource) -> Self {
        let link_real_path = if resource.is_link() {
            resource.real_path()
        } else {
            None
        };
        Mutation::Put {
            path,
            link_real_path,
        }
    }

    /// Operation name, as used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Put { .. } => "put",
            Mutation::Import { .. } => "importResource",
            Mutation::Delete { .. } => "delete",
            Mutation::Move { .. } => "move",
            Mutation::Copy { .. } => "copy",
            Mutation::Rename { .. } => "rename",
            Mutation::CreateLink { .. } => "createLink",
            Mutation::RemoveLink { .. } => "removeLink",
            Mutation::Restore { .. } => "restore",
            Mutation::RestoreVersion { .. } => "restoreVersion",
        }
    }

    /// Paths to invalidate and whether each purge is recursive
    pub fn targets(&self) -> Vec<(String, bool)> {
        match self {
            Mutation::Put {
                path,
                link_real_path,
            } => {
                let mut targets = vec![(path.to_string(), false)];
                if let Some(real) = link_real_path {
                    targets.push((real.clone(), false));
                }
                targets
            }
            Mutation::Import { path } => vec![(path.to_string(), false)],
            Mutation::Delete { path }
            | Mutation::CreateLink { path }
            | Mutation::RemoveLink { path }
            | Mutation::Restore { path } => vec![(path.to_string(), true)],
            Mutation::Move { source, target } => {
                vec![(source.to_string(), true), (target.to_string(), true)]
            }
            Mutation::Copy { target, .. } => vec![(target.to_string(), true)],
            Mutation::Rename { path, new_name } => {
                vec![(path.to_string(), true), (renamed_path(path, new_name), true)]
            }
            Mutation::RestoreVersion { version_path } => {
                vec![(path::resource_part(version_path).to_string(), true)]
            }
        }
    }
}

/// Path a resource ends up at after a rename. Absolute names are taken
/// as-is, bare names stay within the current parent.
fn renamed_path(current: &str, new_name: &str) -> String {
    if new_name.starts_with(path::PATH_SEPARATOR) {
        return path::normalize(new_name);
    }
    let current = path::normalize(current);
    let parent = path::parent_path(&current).unwrap_or_else(|| path::ROOT_PATH.to_string());
    path::child_path(&parent, new_name)
}

// =============================================================================
// Invalidation Interceptor
// =============================================================================

/// Purges cache entries ahead of (and after) mutating calls
pub struct InvalidationInterceptor {
    store: CacheStoreRef,
    keys: Arc<KeyBuilder>,
    ancestor_purge: AncestorPurge,
}

impl InvalidationInterceptor {
    pub fn new(store: CacheStoreRef, keys: Arc<KeyBuilder>, ancestor_purge: AncestorPurge) -> Self {
        Self {
            store,
            keys,
            ancestor_purge,
        }
    }

    /// Invalidate, run `call`, and with `post_pass` invalidate again once
    /// the call returned. The call's result is returned unchanged.
    pub async fn around<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        mutation: &Mutation<'_>,
        post_pass: bool,
        call: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let targets = mutation.targets();
        debug!(operation = mutation.name(), "Invalidating ahead of mutation");
        self.invalidate_all(ctx, &targets).await;

        let result = call().await;

        if post_pass {
            self.invalidate_all(ctx, &targets).await;
        }
        result
    }

    async fn invalidate_all(&self, ctx: &RequestContext, targets: &[(String, bool)]) {
        for (target, recursive) in targets {
            self.invalidate(ctx, target, *recursive).await;
        }
    }

    /// Purge `path` (and its subtree when `recursive`). Failures are logged.
    pub async fn invalidate(&self, ctx: &RequestContext, path: &str, recursive: bool) {
        if let Err(e) = self.purge(ctx, path, recursive).await {
            warn!(path = %path, recursive, error = %e, "Cache invalidation failed, entries may be stale");
        }
    }

    /// Every pass runs even when an earlier one failed; the first error is
    /// returned.
    async fn purge(&self, ctx: &RequestContext, raw_path: &str, recursive: bool) -> Result<()> {
        let tenant = self.keys.resolve_tenant(ctx)?;
        let resolved = self
            .keys
            .resolve_for_tenant(tenant, raw_path, PathTranslation::Mounted);
        let mut outcome = logged(
            self.purge_resolved(&resolved, recursive).await,
            "mounted",
            raw_path,
        );

        // Entries made through the caller-visible path before the mount
        // existed live under the default connection
        if resolved.crossed_database_mount() {
            let shadow = self
                .keys
                .resolve_for_tenant(tenant, raw_path, PathTranslation::Direct);
            let pass = self.purge_resolved(&shadow, recursive).await;
            outcome = outcome.and(logged(pass, "shadow", raw_path));
        }

        if recursive {
            let pass = self.purge_nested_mounts(tenant, raw_path).await;
            outcome = outcome.and(logged(pass, "nested-mounts", raw_path));
        }
        outcome
    }

    /// Purge one resolved path, its subtree if requested, and its ancestors
    pub async fn purge_resolved(&self, resolved: &ResolvedPath, recursive: bool) -> Result<()> {
        let subtree = self.purge_subtree(resolved, recursive).await;
        let ancestors = self.purge_ancestors(&resolved.scope, &resolved.path).await;
        subtree.and(ancestors)
    }

    async fn purge_subtree(&self, resolved: &ResolvedPath, recursive: bool) -> Result<()> {
        let scope = &resolved.scope;
        let target = path::resource_part(&resolved.path);

        let mut removed = usize::from(self.store.remove(&resolved.key()).await?);
        removed += self
            .store
            .remove_matching(scope, &PathMatch::listing(target)?)
            .await?
            .len();
        if recursive {
            removed += self
                .store
                .remove_matching(scope, &PathMatch::Prefix(target.to_string()))
                .await?
                .len();
        }

        debug!(path = %resolved.path, recursive, removed, "Purged cache entries");
        Ok(())
    }

    /// Purge the listings of every ancestor of `path`
    pub async fn purge_ancestors(&self, scope: &KeyScope, raw_path: &str) -> Result<()> {
        let mut current = path::resource_part(raw_path).to_string();

        while let Some(parent) = path::parent_path(&current) {
            let direct = self.store.remove(&scope.key(parent.clone())).await?;
            let windows = self
                .store
                .remove_matching(scope, &PathMatch::listing(&parent)?)
                .await?;
            let found = direct || !windows.is_empty();

            debug!(parent = %parent, found, "Purged ancestor listing");
            if !found && self.ancestor_purge == AncestorPurge::StopAtUncached {
                break;
            }
            current = parent;
        }
        Ok(())
    }

    /// Mounts below a recursively purged path lose their remote entries too
    async fn purge_nested_mounts(&self, tenant: TenantId, raw_path: &str) -> Result<()> {
        let local = path::normalize(path::resource_part(raw_path));
        let mut outcome = Ok(());
        for entry in self.keys.mounts().nested_within(&local) {
            let remote = self.keys.resolve_mount(tenant, entry);
            debug!(mount = %entry.local_prefix, target = %remote.path, "Purging nested mount");
            outcome = outcome.and(self.purge_subtree(&remote, true).await);
        }
        outcome
    }
}

fn logged(result: Result<()>, pass: &str, path: &str) -> Result<()> {
    if let Err(e) = &result {
        warn!(path = %path, pass, error = %e, "Cache purge pass failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ghost::GhostResource;
    use crate::cache::key::CacheKey;
    use crate::cache::mount::{ConnectionDescriptor, MountEntry, MountTable, MountTarget};
    use crate::cache::storage::failing::FailingCacheStore;
    use crate::cache::storage::{CacheStore, MemoryCacheStore};
    use crate::domain::resource::{REGISTRY_LINK, REGISTRY_REAL_PATH};

    const LOCAL: &str = "u@local";
    const REMOTE: &str = "reg@db2";

    fn ctx() -> RequestContext {
        RequestContext::new("admin", TenantId(1))
    }

    fn local(path: &str) -> CacheKey {
        CacheKey::new(TenantId(1), LOCAL, path)
    }

    fn remote(path: &str) -> CacheKey {
        CacheKey::new(TenantId(1), REMOTE, path)
    }

    fn interceptor_over(store: CacheStoreRef, policy: AncestorPurge) -> InvalidationInterceptor {
        let mounts = MountTable::new(vec![MountEntry {
            local_prefix: "/a".into(),
            target_prefix: "/x".into(),
            target: MountTarget::Database(ConnectionDescriptor::new(Some("reg"), "db2")),
        }]);
        let keys = Arc::new(KeyBuilder::new(Arc::new(mounts), LOCAL, "node-0"));
        InvalidationInterceptor::new(store, keys, policy)
    }

    fn interceptor(policy: AncestorPurge) -> (InvalidationInterceptor, Arc<MemoryCacheStore>) {
        let store = Arc::new(MemoryCacheStore::with_defaults("test"));
        (interceptor_over(store.clone(), policy), store)
    }

    async fn fill(store: &MemoryCacheStore, keys: &[CacheKey]) {
        for key in keys {
            store
                .put(key.clone(), Arc::new(GhostResource::unresolved()))
                .await
                .unwrap();
        }
    }

    async fn present(store: &MemoryCacheStore, key: &CacheKey) -> bool {
        store.peek(key).await.unwrap().is_some()
    }

    #[test]
    fn test_mutation_targets() {
        let t = |m: Mutation| m.targets();

        assert_eq!(t(Mutation::Delete { path: "/a" }), vec![("/a".to_string(), true)]);
        assert_eq!(
            t(Mutation::Move {
                source: "/s",
                target: "/t"
            }),
            vec![("/s".to_string(), true), ("/t".to_string(), true)]
        );
        assert_eq!(
            t(Mutation::Copy {
                source: "/s",
                target: "/t"
            }),
            vec![("/t".to_string(), true)]
        );
        assert_eq!(
            t(Mutation::Rename {
                path: "/d/old",
                new_name: "new"
            }),
            vec![("/d/old".to_string(), true), ("/d/new".to_string(), true)]
        );
        assert_eq!(
            t(Mutation::RestoreVersion {
                version_path: "/d/f;version:3"
            }),
            vec![("/d/f".to_string(), true)]
        );
        assert_eq!(Mutation::Import { path: "/i" }.name(), "importResource");
    }

    #[test]
    fn test_put_of_link_adds_real_path() {
        let link = Resource::new("/l", "")
            .with_property(REGISTRY_LINK, "true")
            .with_property(REGISTRY_REAL_PATH, "http://r/registry/resourceContent?path=%2Freal%2Ff");
        assert_eq!(
            Mutation::put("/l", &link).targets(),
            vec![("/l".to_string(), false), ("/real/f".to_string(), false)]
        );

        let plain = Resource::new("/p", "x");
        assert_eq!(Mutation::put("/p", &plain).targets(), vec![("/p".to_string(), false)]);
    }

    #[tokio::test]
    async fn test_non_recursive_purge_hits_path_windows_and_ancestors() {
        let (inv, store) = interceptor(AncestorPurge::ToRoot);
        fill(
            &store,
            &[
                local("/"),
                local("/docs"),
                local("/docs;start=0;pageSize=10"),
                local("/docs/f"),
                local("/docs/f;start=0;pageSize=5"),
                local("/docs/f/child"),
                local("/other"),
            ],
        )
        .await;

        inv.invalidate(&ctx(), "/docs/f", false).await;

        assert!(!present(&store, &local("/docs/f")).await);
        assert!(!present(&store, &local("/docs/f;start=0;pageSize=5")).await);
        assert!(!present(&store, &local("/docs")).await);
        assert!(!present(&store, &local("/docs;start=0;pageSize=10")).await);
        assert!(!present(&store, &local("/")).await);
        assert!(present(&store, &local("/docs/f/child")).await);
        assert!(present(&store, &local("/other")).await);
    }

    #[tokio::test]
    async fn test_recursive_purge_removes_subtree() {
        let (inv, store) = interceptor(AncestorPurge::ToRoot);
        fill(
            &store,
            &[
                local("/p"),
                local("/p/q"),
                local("/p/q/r;start=0;pageSize=2"),
                local("/keep"),
            ],
        )
        .await;

        inv.invalidate(&ctx(), "/p", true).await;

        let remaining = store.keys().await.unwrap();
        assert_eq!(remaining, vec![local("/keep")]);
    }

    #[tokio::test]
    async fn test_mounted_purge_covers_remote_and_shadow_entries() {
        let (inv, store) = interceptor(AncestorPurge::ToRoot);
        fill(
            &store,
            &[remote("/x/f"), remote("/x"), local("/a/f"), local("/a")],
        )
        .await;

        inv.invalidate(&ctx(), "/a/f", false).await;

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_nested_mount_purged_with_parent() {
        let (inv, store) = interceptor(AncestorPurge::ToRoot);
        fill(&store, &[remote("/x"), remote("/x/deep/f"), local("/a")]).await;

        inv.invalidate(&ctx(), "/", true).await;

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stop_at_uncached_ancestor() {
        let (inv, store) = interceptor(AncestorPurge::StopAtUncached);
        fill(&store, &[local("/"), local("/p/q")]).await;

        // "/p" is not cached, so the walk stops before reaching "/"
        inv.invalidate(&ctx(), "/p/q/r", false).await;
        assert!(!present(&store, &local("/p/q")).await);
        assert!(present(&store, &local("/")).await);

        let (inv, store) = interceptor(AncestorPurge::ToRoot);
        fill(&store, &[local("/"), local("/p/q")]).await;
        inv.invalidate(&ctx(), "/p/q/r", false).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_tenant_failure_is_swallowed() {
        let (inv, store) = interceptor(AncestorPurge::ToRoot);
        fill(&store, &[local("/a")]).await;

        inv.invalidate(&RequestContext::anonymous("nobody"), "/a", true)
            .await;
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_around_runs_post_pass() {
        let (inv, store) = interceptor(AncestorPurge::ToRoot);
        let store_in_call = store.clone();

        let result = inv
            .around(&ctx(), &Mutation::Delete { path: "/d" }, true, || async move {
                // A racing reader repopulates while the write is in flight
                store_in_call
                    .put(local("/d"), Arc::new(GhostResource::unresolved()))
                    .await?;
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_mounted_pass_still_purges_shadow_entries() {
        let store = Arc::new(FailingCacheStore::failing_for(REMOTE));
        let inv = interceptor_over(store.clone(), AncestorPurge::ToRoot);
        fill(store.inner(), &[remote("/x/f"), local("/a/f"), local("/a")]).await;

        let result = inv.purge(&ctx(), "/a/f", false).await;

        assert!(result.unwrap_err().is_cache_failure());
        assert!(!present(store.inner(), &local("/a/f")).await);
        assert!(!present(store.inner(), &local("/a")).await);
        assert!(present(store.inner(), &remote("/x/f")).await);
    }

    #[tokio::test]
    async fn test_failed_local_pass_still_purges_nested_mounts() {
        let store = Arc::new(FailingCacheStore::failing_for(LOCAL));
        let inv = interceptor_over(store.clone(), AncestorPurge::ToRoot);
        fill(store.inner(), &[remote("/x"), remote("/x/deep/f"), local("/a")]).await;

        assert!(inv.purge(&ctx(), "/", true).await.is_err());

        assert!(!present(store.inner(), &remote("/x")).await);
        assert!(!present(store.inner(), &remote("/x/deep/f")).await);
        assert!(present(store.inner(), &local("/a")).await);
    }
}
