//! Mount-Aware Registry Cache
//!
//! Read-through caching in front of a hierarchical [`Registry`] with
//! write-triggered invalidation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CacheBackedRegistry                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐              ┌──────────────────────────────┐   │
//! │  │  ReadThroughCache  │              │   InvalidationInterceptor    │   │
//! │  │  get / getPaged /  │              │   put, delete, move, copy,   │   │
//! │  │  resourceExists    │              │   rename, links, restore     │   │
//! │  └─────────┬──────────┘              └──────────────┬───────────────┘   │
//! │            │         ┌──────────────────┐           │                   │
//! │            └────────▶│   KeyBuilder     │◀──────────┘                   │
//! │                      │  (MountTable)    │                               │
//! │                      └────────┬─────────┘                               │
//! │                               │                                         │
//! │                    ┌──────────┴──────────┐                              │
//! │                    │     CacheStore      │                              │
//! │                    │ (DashMap + ordered  │                              │
//! │                    │   key index)        │                              │
//! │                    └─────────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use registry_cache::cache::{CacheBackedRegistry, CachePartitions};
//! use registry_cache::store::InMemoryRegistry;
//! use registry_cache::auth::AllowAll;
//!
//! let partitions = CachePartitions::new(config.store.clone());
//! let registry = CacheBackedRegistry::in_partition(
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(AllowAll),
//!     &partitions,
//!     &config,
//! )?;
//!
//! registry.put(&ctx, "/docs/readme", Resource::new("", "hello")).await?;
//! let doc = registry.get(&ctx, "/docs/readme").await?;   // miss, fetched
//! let doc = registry.get(&ctx, "/docs/readme").await?;   // hit
//! ```
//!
//! [`Registry`]: crate::domain::Registry

pub mod events;
pub mod ghost;
pub mod invalidation;
pub mod key;
pub mod lock;
pub mod metrics;
pub mod mount;
pub mod read_through;
pub mod registry;
pub mod storage;

pub use events::{CacheEvent, EvictionReason};
pub use ghost::GhostResource;
pub use invalidation::{InvalidationInterceptor, Mutation};
pub use key::{CacheKey, KeyBuilder, KeyScope, PathTranslation, ResolvedPath};
pub use lock::KeyedLocks;
pub use metrics::{HitRateProbe, StoreMetrics, StoreMetricsSnapshot};
pub use mount::{ConnectionDescriptor, MountEntry, MountTable, MountTarget};
pub use read_through::ReadThroughCache;
pub use registry::CacheBackedRegistry;
pub use storage::{CachePartitions, CacheStore, CacheStoreRef, CachedResource, MemoryCacheStore, PathMatch};
