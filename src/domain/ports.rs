//! Domain Ports - Core trait definitions for the registry cache
//!
//! These traits define the boundaries between the cache and the systems it
//! sits in front of. The backing store and the cache façade implement the
//! same [`Registry`] trait, so the cache can be slotted into any chain.

use crate::domain::resource::Resource;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Tenancy
// =============================================================================

/// Tenant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub i32);

impl TenantId {
    /// The super tenant owning the base registry
    pub const SUPER_TENANT: TenantId = TenantId(-1234);
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-call context threaded through every registry operation.
///
/// Tenant resolution walks the fields in order: `tenant_override`, then the
/// session tenant, then the process tenant.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Calling user
    pub user: String,
    /// Tenant pinned explicitly for this call
    pub tenant_override: Option<TenantId>,
    /// Tenant of the authenticated session
    pub session_tenant: Option<TenantId>,
    /// Tenant of the hosting process
    pub process_tenant: Option<TenantId>,
}

impl RequestContext {
    /// Context for a user in a session tenant
    pub fn new(user: impl Into<String>, tenant: TenantId) -> Self {
        Self {
            user: user.into(),
            session_tenant: Some(tenant),
            ..Default::default()
        }
    }

    /// Context with no tenant information at all
    pub fn anonymous(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }

    /// Pin the tenant for this call
    pub fn with_tenant_override(mut self, tenant: TenantId) -> Self {
        self.tenant_override = Some(tenant);
        self
    }

    /// Set the process-wide fallback tenant
    pub fn with_process_tenant(mut self, tenant: TenantId) -> Self {
        self.process_tenant = Some(tenant);
        self
    }
}

// =============================================================================
// Authorization
// =============================================================================

/// Registry actions subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Get,
    Put,
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Get => write!(f, "get"),
            Action::Put => write!(f, "put"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// Authorization boundary. Must be side-effect free.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether the caller may perform `action` on `path`
    async fn authorize(&self, ctx: &RequestContext, path: &str, action: Action) -> Result<bool>;
}

pub type AuthorizerRef = Arc<dyn Authorizer>;

// =============================================================================
// Community & Association Types
// =============================================================================

/// Directed association between two resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub source_path: String,
    pub target_path: String,
    pub association_type: String,
}

/// A comment on a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Path of the comment itself (`<resource>;comments:<n>`)
    pub path: String,
    pub resource_path: String,
    pub user: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Registry (Backing Store Boundary)
// =============================================================================

/// Tree-structured, versioned resource store.
///
/// The cache consumes this trait from the backing store and also implements
/// it, forwarding everything it does not cache.
#[async_trait]
pub trait Registry: Send + Sync {
    // ----- reads -------------------------------------------------------------

    /// Get a resource (collections carry their full child listing)
    async fn get(&self, ctx: &RequestContext, path: &str) -> Result<Resource>;

    /// Get one page of a collection listing
    async fn get_paged(
        &self,
        ctx: &RequestContext,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> Result<Resource>;

    /// Check whether a resource exists
    async fn resource_exists(&self, ctx: &RequestContext, path: &str) -> Result<bool>;

    /// Get a resource without its content
    async fn get_metadata(&self, ctx: &RequestContext, path: &str) -> Result<Resource>;

    // ----- writes ------------------------------------------------------------

    /// Store a resource, returning the path it was stored at
    async fn put(&self, ctx: &RequestContext, path: &str, resource: Resource) -> Result<String>;

    /// Import a resource from a URL
    async fn import_resource(
        &self,
        ctx: &RequestContext,
        suggested_path: &str,
        source_url: &str,
        resource: Resource,
    ) -> Result<String>;

    /// Delete a resource and everything beneath it
    async fn delete(&self, ctx: &RequestContext, path: &str) -> Result<()>;

    /// Rename a resource within its parent
    async fn rename(&self, ctx: &RequestContext, current_path: &str, new_name: &str)
        -> Result<String>;

    /// Move a resource (and its subtree)
    async fn move_resource(
        &self,
        ctx: &RequestContext,
        current_path: &str,
        new_path: &str,
    ) -> Result<String>;

    /// Copy a resource (and its subtree)
    async fn copy(&self, ctx: &RequestContext, source_path: &str, target_path: &str)
        -> Result<String>;

    /// Create a symbolic link at `path` pointing to `target`
    async fn create_link(&self, ctx: &RequestContext, path: &str, target: &str) -> Result<()>;

    /// Remove a symbolic link
    async fn remove_link(&self, ctx: &RequestContext, path: &str) -> Result<()>;

    /// Replace the subtree at `path` with a dump produced by [`Registry::dump`]
    async fn restore(&self, ctx: &RequestContext, path: &str, dump: &str) -> Result<()>;

    /// Serialize the subtree at `path`
    async fn dump(&self, ctx: &RequestContext, path: &str) -> Result<String>;

    // ----- versioning --------------------------------------------------------

    /// Snapshot the current state of a resource
    async fn create_version(&self, ctx: &RequestContext, path: &str) -> Result<()>;

    /// List version paths of a resource
    async fn get_versions(&self, ctx: &RequestContext, path: &str) -> Result<Vec<String>>;

    /// Restore a resource to a version path (`/a;version:2`)
    async fn restore_version(&self, ctx: &RequestContext, version_path: &str) -> Result<()>;

    // ----- associations ------------------------------------------------------

    async fn add_association(
        &self,
        ctx: &RequestContext,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> Result<()>;

    async fn remove_association(
        &self,
        ctx: &RequestContext,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> Result<()>;

    async fn get_associations(&self, ctx: &RequestContext, path: &str)
        -> Result<Vec<Association>>;

    // ----- community features ------------------------------------------------

    async fn apply_tag(&self, ctx: &RequestContext, path: &str, tag: &str) -> Result<()>;

    async fn remove_tag(&self, ctx: &RequestContext, path: &str, tag: &str) -> Result<()>;

    async fn get_tags(&self, ctx: &RequestContext, path: &str) -> Result<Vec<String>>;

    async fn add_comment(&self, ctx: &RequestContext, path: &str, text: &str) -> Result<String>;

    async fn get_comments(&self, ctx: &RequestContext, path: &str) -> Result<Vec<Comment>>;

    async fn rate_resource(&self, ctx: &RequestContext, path: &str, rating: u8) -> Result<()>;

    async fn get_average_rating(&self, ctx: &RequestContext, path: &str) -> Result<f32>;

    // ----- transactions ------------------------------------------------------

    async fn begin_transaction(&self, ctx: &RequestContext) -> Result<()>;

    async fn commit_transaction(&self, ctx: &RequestContext) -> Result<()>;

    async fn rollback_transaction(&self, ctx: &RequestContext) -> Result<()>;
}

/// Type alias for Arc'd Registry
pub type RegistryRef = Arc<dyn Registry>;

/// Content of a resource, convenience for callers that only need the bytes
pub async fn read_content(registry: &dyn Registry, ctx: &RequestContext, path: &str) -> Result<Bytes> {
    Ok(registry.get(ctx, path).await?.content)
}
