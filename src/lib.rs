//! Registry Cache
//!
//! A mount-aware, multi-tenant read-through cache for hierarchical resource
//! registries, with write-triggered invalidation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Registry callers                                    │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                     CacheBackedRegistry (cache)                              │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Read-Through   │  │   Key Builder   │  │   Write Invalidation        │  │
//! │  │  (keyed locks)  │  │  (mount table)  │  │   (recursive + ancestors)   │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │  Cache Store per      │                                │
//! │                    │  partition (storage)  │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                   Backing Registry (domain::Registry)                        │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: keys, mounts, cache store, read-through and invalidation
//! - [`store`]: in-memory backing registry
//! - [`auth`]: authorizer implementations
//! - [`config`]: YAML configuration
//! - [`domain`]: paths, resources and port traits
//! - [`error`]: Error types and handling

pub mod auth;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod store;

// Re-export commonly used types
pub use cache::{
    CacheBackedRegistry, CacheKey, CachePartitions, CacheStore, HitRateProbe, KeyBuilder,
    MemoryCacheStore, MountTable,
};

pub use config::{AncestorPurge, CacheConfig};

pub use domain::{
    Action, Authorizer, AuthorizerRef, Registry, RegistryRef, RequestContext, Resource, TenantId,
};

pub use error::{Error, Result};

pub use store::InMemoryRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
