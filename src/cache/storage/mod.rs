//! Cache Store
//!
//! The shared key to ghost-resource map behind the read-through cache, and
//! the registry of named partitions that lets every façade in a process
//! share one store per partition.

mod memory;

#[cfg(test)]
pub(crate) mod failing;

pub use memory::MemoryCacheStore;

use crate::cache::events::CacheEvent;
use crate::cache::ghost::GhostResource;
use crate::cache::key::{CacheKey, KeyScope};
use crate::cache::metrics::StoreMetrics;
use crate::config::StoreConfig;
use crate::domain::Resource;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Value stored per key
pub type CachedResource = Arc<GhostResource<Resource>>;

// =============================================================================
// Path Matching
// =============================================================================

/// Selects cached paths within one key scope
#[derive(Debug, Clone)]
pub enum PathMatch {
    /// Every path starting with the given string (raw prefix match)
    Prefix(String),
    /// Paths starting with `prefix` that also match `pattern`
    Pattern { prefix: String, pattern: Regex },
}

impl PathMatch {
    /// The listing of `parent`: the parent itself, with a trailing `/`, and
    /// every paginated window of it (`^parent(/)?(;start=.*)?$`)
    pub fn listing(parent: &str) -> Result<Self> {
        let pattern = Regex::new(&format!("^{}(/)?(;start=.*)?$", regex::escape(parent)))?;
        Ok(PathMatch::Pattern {
            prefix: parent.to_string(),
            pattern,
        })
    }

    /// Literal prefix every matching path starts with
    pub fn prefix(&self) -> &str {
        match self {
            PathMatch::Prefix(prefix) => prefix,
            PathMatch::Pattern { prefix, .. } => prefix,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathMatch::Pattern { prefix, pattern } => {
                path.starts_with(prefix.as_str()) && pattern.is_match(path)
            }
        }
    }
}

// =============================================================================
// CacheStore Trait
// =============================================================================

/// Concurrent key to ghost-resource map
///
/// Every removal made through this trait advances the store generation.
/// Readers snapshot the generation before a backing store fetch and populate
/// with [`CacheStore::put_if_generation`], which refuses the value only when
/// a later removal covered its key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Partition name
    fn name(&self) -> &str;

    /// Look up a key (counts as a hit or miss)
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResource>>;

    /// Look up a key without touching the hit/miss counters
    async fn peek(&self, key: &CacheKey) -> Result<Option<CachedResource>>;

    /// Store a value unconditionally
    async fn put(&self, key: CacheKey, value: CachedResource) -> Result<()>;

    /// Store a value unless a removal covering `key` happened after
    /// `generation`.
    ///
    /// Returns whether the value was stored.
    async fn put_if_generation(
        &self,
        key: CacheKey,
        value: CachedResource,
        generation: u64,
    ) -> Result<bool>;

    /// Remove one key, returning whether it was present
    async fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// Whether a key is present (counts as a hit or miss)
    async fn contains(&self, key: &CacheKey) -> Result<bool>;

    /// Remove every key in `scope` whose path satisfies `matcher`
    async fn remove_matching(&self, scope: &KeyScope, matcher: &PathMatch) -> Result<Vec<CacheKey>>;

    /// All keys, in key order
    async fn keys(&self) -> Result<Vec<CacheKey>>;

    /// Current entry count
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    async fn clear(&self) -> Result<()>;

    /// Current invalidation generation
    fn generation(&self) -> u64;

    fn metrics(&self) -> &StoreMetrics;

    /// Subscribe to store events
    fn subscribe(&self) -> broadcast::Receiver<CacheEvent>;
}

/// Type alias for shared cache stores
pub type CacheStoreRef = Arc<dyn CacheStore>;

// =============================================================================
// Partitions
// =============================================================================

/// Named Cache Store partitions shared across façades
#[derive(Clone)]
pub struct CachePartitions {
    stores: Arc<DashMap<String, CacheStoreRef>>,
    config: StoreConfig,
}

impl CachePartitions {
    /// Partitions whose stores are created with `config`
    pub fn new(config: StoreConfig) -> Self {
        Self {
            stores: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Get a partition, creating an in-memory store on first use
    pub fn get_or_create(&self, name: &str) -> CacheStoreRef {
        self.stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCacheStore::new(name, &self.config)))
            .clone()
    }

    /// Register a store under a name, replacing any previous one
    pub fn insert(&self, name: impl Into<String>, store: CacheStoreRef) {
        self.stores.insert(name.into(), store);
    }

    pub fn get(&self, name: &str) -> Option<CacheStoreRef> {
        self.stores.get(name).map(|s| s.value().clone())
    }

    /// All partitions, sorted by name
    pub fn all(&self) -> Vec<(String, CacheStoreRef)> {
        let mut all: Vec<_> = self
            .stores
            .iter()
            .map(|s| (s.key().clone(), s.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

impl Default for CachePartitions {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_pattern() {
        let listing = PathMatch::listing("/docs").unwrap();
        assert!(listing.matches("/docs"));
        assert!(listing.matches("/docs/"));
        assert!(listing.matches("/docs;start=0;pageSize=10"));
        assert!(listing.matches("/docs/;start=10;pageSize=10"));
        assert!(!listing.matches("/docs/a"));
        assert!(!listing.matches("/docs2"));
        assert!(!listing.matches("/docs;version:1"));
        assert_eq!(listing.prefix(), "/docs");
    }

    #[test]
    fn test_prefix_is_raw() {
        let prefix = PathMatch::Prefix("/a/b".into());
        assert!(prefix.matches("/a/b"));
        assert!(prefix.matches("/a/b/c"));
        assert!(prefix.matches("/a/bc"));
        assert!(!prefix.matches("/a"));
    }

    #[test]
    fn test_partitions_share_stores() {
        let partitions = CachePartitions::default();
        let a = partitions.get_or_create("p");
        let b = partitions.clone().get_or_create("p");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(partitions.get("missing").is_none());

        partitions.get_or_create("a");
        let names: Vec<_> = partitions.all().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "p"]);
    }
}
