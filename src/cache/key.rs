//! Cache Keys
//!
//! A cache key addresses one cached resource: tenant, backend connection
//! identity and path. The [`KeyBuilder`] derives keys from caller-visible
//! paths, applying mount translation so the same logical resource gets the
//! same key whichever route it was reached by.

use crate::cache::mount::{MountEntry, MountTable, MountTarget};
use crate::domain::path::{self, LOCAL_REPOSITORY_BASE_PATH};
use crate::domain::{RequestContext, TenantId};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key: tenant, connection identity, path.
///
/// Ordering is tenant, then connection, then path, so all keys of one
/// tenant and connection form a contiguous range sorted by path. `None`
/// sorts before any value and is only equal to itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub tenant_id: TenantId,
    pub connection_id: Option<String>,
    pub path: Option<String>,
}

impl CacheKey {
    pub fn new(tenant_id: TenantId, connection_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            tenant_id,
            connection_id: Some(connection_id.into()),
            path: Some(path.into()),
        }
    }

    /// Scope (tenant and connection) this key belongs to
    pub fn scope(&self) -> KeyScope {
        KeyScope {
            tenant_id: self.tenant_id,
            connection_id: self.connection_id.clone(),
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.tenant_id,
            self.connection_id.as_deref().unwrap_or("-"),
            self.path.as_deref().unwrap_or("-")
        )
    }
}

/// Tenant and connection shared by a group of keys
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyScope {
    pub tenant_id: TenantId,
    pub connection_id: Option<String>,
}

impl KeyScope {
    pub fn new(tenant_id: TenantId, connection_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            connection_id: Some(connection_id.into()),
        }
    }

    /// Key for `path` within this scope
    pub fn key(&self, path: impl Into<String>) -> CacheKey {
        CacheKey {
            tenant_id: self.tenant_id,
            connection_id: self.connection_id.clone(),
            path: Some(path.into()),
        }
    }

    /// Whether `key` belongs to this scope
    pub fn contains(&self, key: &CacheKey) -> bool {
        key.tenant_id == self.tenant_id && key.connection_id == self.connection_id
    }
}

// =============================================================================
// Path Resolution
// =============================================================================

/// How a path is mapped onto a key scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathTranslation {
    /// Apply the mount table to the caller-visible path
    Mounted,
    /// Use the path verbatim under the default connection
    Direct,
}

/// Kind of mount a path was resolved through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    Database,
    CachePartition,
}

impl MountKind {
    fn of(target: &MountTarget) -> Self {
        match target {
            MountTarget::Database(_) => MountKind::Database,
            MountTarget::CachePartition(_) => MountKind::CachePartition,
        }
    }
}

/// A path resolved to its cache scope and key path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub scope: KeyScope,
    /// Path after normalisation and mount translation
    pub path: String,
    /// Mount the path was translated through, if any
    pub mount: Option<MountKind>,
}

impl ResolvedPath {
    pub fn key(&self) -> CacheKey {
        self.scope.key(self.path.clone())
    }

    /// Whether the path was translated through a database-backed mount
    pub fn crossed_database_mount(&self) -> bool {
        self.mount == Some(MountKind::Database)
    }
}

// =============================================================================
// Key Builder
// =============================================================================

/// Derives cache keys from request contexts and paths
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    mounts: Arc<MountTable>,
    default_identity: String,
    node_identifier: String,
    bound_tenant: Option<TenantId>,
}

impl KeyBuilder {
    pub fn new(
        mounts: Arc<MountTable>,
        default_identity: impl Into<String>,
        node_identifier: impl Into<String>,
    ) -> Self {
        Self {
            mounts,
            default_identity: default_identity.into().to_lowercase(),
            node_identifier: node_identifier.into(),
            bound_tenant: None,
        }
    }

    /// Bind every key built by this builder to one tenant
    pub fn with_bound_tenant(mut self, tenant: TenantId) -> Self {
        self.bound_tenant = Some(tenant);
        self
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// Tenant for a call: bound tenant, then the context's override,
    /// session and process tenants.
    pub fn resolve_tenant(&self, ctx: &RequestContext) -> Result<TenantId> {
        self.bound_tenant
            .or(ctx.tenant_override)
            .or(ctx.session_tenant)
            .or(ctx.process_tenant)
            .ok_or_else(|| {
                Error::TenantResolution(format!("no tenant available for user {}", ctx.user))
            })
    }

    /// Resolve a caller-visible path to its scope and key path
    pub fn resolve(
        &self,
        ctx: &RequestContext,
        raw_path: &str,
        translation: PathTranslation,
    ) -> Result<ResolvedPath> {
        let tenant_id = self.resolve_tenant(ctx)?;
        Ok(self.resolve_for_tenant(tenant_id, raw_path, translation))
    }

    /// Resolve a path for an already-known tenant
    pub fn resolve_for_tenant(
        &self,
        tenant_id: TenantId,
        raw_path: &str,
        translation: PathTranslation,
    ) -> ResolvedPath {
        let normalized = path::normalize(raw_path);

        let mounted = match translation {
            PathTranslation::Mounted => self.mounts.resolve(&normalized),
            PathTranslation::Direct => None,
        };

        let (identity, key_path, mount) = match mounted {
            Some(m) => (
                m.entry.target.identity(),
                m.remote_path,
                Some(MountKind::of(&m.entry.target)),
            ),
            None => (self.default_identity.clone(), normalized, None),
        };

        self.scoped(tenant_id, identity, key_path, mount)
    }

    /// The remote root of one mount, as seen by the cache
    pub fn resolve_mount(&self, tenant_id: TenantId, entry: &MountEntry) -> ResolvedPath {
        self.scoped(
            tenant_id,
            entry.target.identity(),
            entry.target_prefix.clone(),
            Some(MountKind::of(&entry.target)),
        )
    }

    fn scoped(
        &self,
        tenant_id: TenantId,
        identity: String,
        key_path: String,
        mount: Option<MountKind>,
    ) -> ResolvedPath {
        let identity = if path::is_within(LOCAL_REPOSITORY_BASE_PATH, &key_path) {
            format!("{}:{}", self.node_identifier, identity)
        } else {
            identity
        };

        ResolvedPath {
            scope: KeyScope::new(tenant_id, identity),
            path: key_path,
            mount,
        }
    }

    /// Key for a caller-visible path
    pub fn build_key(&self, ctx: &RequestContext, raw_path: &str) -> Result<CacheKey> {
        Ok(self.resolve(ctx, raw_path, PathTranslation::Mounted)?.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mount::ConnectionDescriptor;
    use assert_matches::assert_matches;

    fn builder() -> KeyBuilder {
        let mounts = MountTable::new(vec![
            MountEntry {
                local_prefix: "/a".into(),
                target_prefix: "/x".into(),
                target: MountTarget::Database(ConnectionDescriptor::new(Some("reg"), "db2")),
            },
            MountEntry {
                local_prefix: "/conf".into(),
                target_prefix: "/_system/local/conf".into(),
                target: MountTarget::CachePartition("ConfCache".into()),
            },
        ]);
        KeyBuilder::new(Arc::new(mounts), "wso2@jdbc:h2:local", "node-1")
    }

    fn ctx() -> RequestContext {
        RequestContext::new("admin", TenantId(1))
    }

    #[test]
    fn test_key_ordering_groups_scopes() {
        let scope = KeyScope::new(TenantId(1), "c");
        let mut keys = vec![
            scope.key("/b"),
            CacheKey::new(TenantId(0), "c", "/z"),
            scope.key("/a/x"),
            scope.key("/a"),
        ];
        keys.sort();
        let paths: Vec<_> = keys.iter().map(|k| k.path().unwrap()).collect();
        assert_eq!(paths, vec!["/z", "/a", "/a/x", "/b"]);
    }

    #[test]
    fn test_null_fields_are_self_equal() {
        let a = CacheKey {
            tenant_id: TenantId(1),
            connection_id: None,
            path: None,
        };
        assert_eq!(a, a.clone());
        assert_ne!(a, KeyScope::new(TenantId(1), "").key(""));
        assert_eq!(a.to_string(), "1:-:-");
    }

    #[test]
    fn test_default_connection_key() {
        let key = builder().build_key(&ctx(), "/docs/").unwrap();
        assert_eq!(key, CacheKey::new(TenantId(1), "wso2@jdbc:h2:local", "/docs"));
    }

    #[test]
    fn test_mounted_key_matches_direct_target() {
        let b = builder();
        let via_mount = b.resolve(&ctx(), "/a/f", PathTranslation::Mounted).unwrap();
        assert!(via_mount.crossed_database_mount());
        assert_eq!(via_mount.key(), CacheKey::new(TenantId(1), "reg@db2", "/x/f"));

        let direct = b.resolve(&ctx(), "/a/f", PathTranslation::Direct).unwrap();
        assert_eq!(direct.mount, None);
        assert_eq!(direct.key(), CacheKey::new(TenantId(1), "wso2@jdbc:h2:local", "/a/f"));
    }

    #[test]
    fn test_node_local_prefix() {
        let b = builder();
        let key = b.build_key(&ctx(), "/_system/local/repo").unwrap();
        assert_eq!(key.connection_id.as_deref(), Some("node-1:wso2@jdbc:h2:local"));

        let resolved = b.resolve(&ctx(), "/conf/x", PathTranslation::Mounted).unwrap();
        assert_eq!(resolved.mount, Some(MountKind::CachePartition));
        assert_eq!(resolved.path, "/_system/local/conf/x");
        assert_eq!(resolved.scope.connection_id.as_deref(), Some("node-1:confcache"));
    }

    #[test]
    fn test_tenant_resolution_order() {
        let b = builder();
        let ctx = RequestContext::anonymous("u")
            .with_process_tenant(TenantId(3))
            .with_tenant_override(TenantId(9));
        assert_eq!(b.resolve_tenant(&ctx).unwrap(), TenantId(9));

        let process_only = RequestContext::anonymous("u").with_process_tenant(TenantId(3));
        assert_eq!(b.resolve_tenant(&process_only).unwrap(), TenantId(3));

        let bound = b.clone().with_bound_tenant(TenantId::SUPER_TENANT);
        assert_eq!(bound.resolve_tenant(&ctx).unwrap(), TenantId::SUPER_TENANT);

        assert_matches!(
            b.build_key(&RequestContext::anonymous("u"), "/a"),
            Err(Error::TenantResolution(_))
        );
    }
}
