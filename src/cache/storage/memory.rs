//! In-Memory Cache Store
//!
//! DashMap for lock-free lookups plus an ordered key index for prefix and
//! listing purges. All writes go through the index lock, which is also what
//! makes generation checks atomic with the insert they guard.
//!
//! Removals are stamped and kept in a bounded log, so a guarded populate is
//! only refused by a removal that covered its own key.

use crate::cache::events::{CacheEvent, EvictionReason};
use crate::cache::key::{CacheKey, KeyScope};
use crate::cache::metrics::StoreMetrics;
use crate::cache::storage::{CacheStore, CachedResource, PathMatch};
use crate::config::StoreConfig;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::RwLock;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: CachedResource,
    created_at: Instant,
}

/// Removals remembered for populate checks
const REMOVAL_LOG_CAPACITY: usize = 4096;

/// What one removal covered
#[derive(Debug)]
enum Removed {
    Key(CacheKey),
    Matching { scope: KeyScope, matcher: PathMatch },
    All,
}

impl Removed {
    fn covers(&self, key: &CacheKey) -> bool {
        match self {
            Removed::Key(removed) => removed == key,
            Removed::Matching { scope, matcher } => {
                scope.contains(key) && key.path().is_some_and(|p| matcher.matches(p))
            }
            Removed::All => true,
        }
    }
}

#[derive(Debug, Default)]
struct KeyIndex {
    /// Keys in tenant, connection, path order
    ordered: BTreeSet<CacheKey>,
    /// Keys in insertion order, oldest first
    insertion: IndexSet<CacheKey>,
    /// Stamped removals, oldest first
    removals: VecDeque<(u64, Removed)>,
    /// Newest stamp that fell out of `removals`
    forgotten_through: u64,
}

impl KeyIndex {
    fn remove(&mut self, key: &CacheKey) {
        self.ordered.remove(key);
        self.insertion.shift_remove(key);
    }

    fn record(&mut self, stamp: u64, removed: Removed) {
        if self.removals.len() >= REMOVAL_LOG_CAPACITY {
            if let Some((oldest, _)) = self.removals.pop_front() {
                self.forgotten_through = oldest;
            }
        }
        self.removals.push_back((stamp, removed));
    }

    /// Whether a removal after `generation` covered `key`. Once the log
    /// has dropped stamps past `generation` the answer is assumed yes.
    fn removed_since(&self, key: &CacheKey, generation: u64) -> bool {
        if self.forgotten_through > generation {
            return true;
        }
        self.removals
            .iter()
            .rev()
            .take_while(|(stamp, _)| *stamp > generation)
            .any(|(_, removed)| removed.covers(key))
    }
}

// =============================================================================
// Memory Cache Store
// =============================================================================

/// Cache Store kept in process memory
pub struct MemoryCacheStore {
    name: String,
    entries: DashMap<CacheKey, StoredEntry>,
    index: RwLock<KeyIndex>,
    generation: AtomicU64,
    max_entries: usize,
    ttl: Option<Duration>,
    metrics: StoreMetrics,
    event_tx: broadcast::Sender<CacheEvent>,
}

impl MemoryCacheStore {
    pub fn new(name: impl Into<String>, config: &StoreConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            name: name.into(),
            entries: DashMap::new(),
            index: RwLock::new(KeyIndex::default()),
            generation: AtomicU64::new(0),
            max_entries: config.max_entries.max(1),
            ttl: config.ttl_seconds.map(Duration::from_secs),
            metrics: StoreMetrics::new(),
            event_tx,
        }
    }

    /// Store with default sizing
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, &StoreConfig::default())
    }

    fn next_stamp(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn is_expired(&self, entry: &StoredEntry) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.created_at.elapsed() >= ttl)
    }

    /// Live entry for a key, dropping it first if it expired
    fn lookup(&self, key: &CacheKey) -> Option<CachedResource> {
        let expired = match self.entries.get(key) {
            Some(entry) if !self.is_expired(&entry) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            let mut index = self.index.write();
            let still_expired = self
                .entries
                .get(key)
                .is_some_and(|entry| self.is_expired(&entry));
            if still_expired {
                self.entries.remove(key);
                index.remove(key);
                self.metrics.record_eviction();
                self.emit(CacheEvent::evicted(key, EvictionReason::Expired));
            }
        }
        None
    }

    fn insert_locked(&self, index: &mut KeyIndex, key: CacheKey, value: CachedResource) {
        let entry = StoredEntry {
            value,
            created_at: Instant::now(),
        };
        if self.entries.insert(key.clone(), entry).is_some() {
            index.insertion.shift_remove(&key);
        }
        index.ordered.insert(key.clone());
        index.insertion.insert(key.clone());
        self.metrics.record_put();
        self.emit(CacheEvent::populated(&key));

        while self.entries.len() > self.max_entries {
            let Some(oldest) = index.insertion.shift_remove_index(0) else {
                break;
            };
            index.ordered.remove(&oldest);
            self.entries.remove(&oldest);
            self.metrics.record_eviction();
            debug!(partition = %self.name, key = %oldest, "Evicted for capacity");
            self.emit(CacheEvent::evicted(&oldest, EvictionReason::Capacity));
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResource>> {
        let found = self.lookup(key);
        match found {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        Ok(found)
    }

    async fn peek(&self, key: &CacheKey) -> Result<Option<CachedResource>> {
        Ok(self.lookup(key))
    }

    async fn put(&self, key: CacheKey, value: CachedResource) -> Result<()> {
        let mut index = self.index.write();
        self.insert_locked(&mut index, key, value);
        Ok(())
    }

    async fn put_if_generation(
        &self,
        key: CacheKey,
        value: CachedResource,
        generation: u64,
    ) -> Result<bool> {
        let mut index = self.index.write();
        if index.removed_since(&key, generation) {
            self.metrics.record_rejected_populate();
            debug!(partition = %self.name, key = %key, "Refused populate that raced with an invalidation");
            return Ok(false);
        }
        self.insert_locked(&mut index, key, value);
        Ok(true)
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let mut index = self.index.write();
        let stamp = self.next_stamp();
        index.record(stamp, Removed::Key(key.clone()));
        let removed = self.entries.remove(key).is_some();
        if removed {
            index.remove(key);
            self.metrics.record_removals(1);
            self.emit(CacheEvent::invalidated(std::slice::from_ref(key)));
        }
        Ok(removed)
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool> {
        let found = self.lookup(key).is_some();
        if found {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        Ok(found)
    }

    async fn remove_matching(&self, scope: &KeyScope, matcher: &PathMatch) -> Result<Vec<CacheKey>> {
        let mut index = self.index.write();
        let stamp = self.next_stamp();
        index.record(
            stamp,
            Removed::Matching {
                scope: scope.clone(),
                matcher: matcher.clone(),
            },
        );

        let prefix = matcher.prefix();
        let matched: Vec<CacheKey> = index
            .ordered
            .range(scope.key(prefix)..)
            .take_while(|k| scope.contains(k) && k.path().is_some_and(|p| p.starts_with(prefix)))
            .filter(|k| k.path().is_some_and(|p| matcher.matches(p)))
            .cloned()
            .collect();

        for key in &matched {
            self.entries.remove(key);
            index.remove(key);
        }
        if !matched.is_empty() {
            self.metrics.record_removals(matched.len() as u64);
            self.emit(CacheEvent::invalidated(&matched));
        }
        Ok(matched)
    }

    async fn keys(&self) -> Result<Vec<CacheKey>> {
        Ok(self.index.read().ordered.iter().cloned().collect())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    async fn clear(&self) -> Result<()> {
        let mut index = self.index.write();
        let stamp = self.next_stamp();
        index.removals.clear();
        index.record(stamp, Removed::All);
        let removed = self.entries.len() as u64;
        self.entries.clear();
        index.ordered.clear();
        index.insertion.clear();
        self.emit(CacheEvent::Cleared {
            entries_removed: removed,
        });
        Ok(())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ghost::GhostResource;
    use crate::domain::{Resource, TenantId};
    use std::sync::Arc;

    fn scope() -> KeyScope {
        KeyScope::new(TenantId(1), "u@db")
    }

    fn ghost(path: &str) -> CachedResource {
        Arc::new(GhostResource::resolved(Resource::new(path, "x")))
    }

    async fn fill(store: &MemoryCacheStore, paths: &[&str]) {
        for p in paths {
            store.put(scope().key(*p), ghost(p)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MemoryCacheStore::with_defaults("test");
        let key = scope().key("/a");

        assert!(store.get(&key).await.unwrap().is_none());
        store.put(key.clone(), ghost("/a")).await.unwrap();
        assert_eq!(store.len(), 1);

        let hit = store.get(&key).await.unwrap().unwrap();
        assert_eq!(hit.payload().unwrap().path, "/a");
        assert!(store.contains(&key).await.unwrap());
        assert!(store.peek(&key).await.unwrap().is_some());

        let generation = store.generation();
        assert!(store.remove(&key).await.unwrap());
        assert!(!store.remove(&key).await.unwrap());
        assert!(store.generation() > generation);
        assert!(store.is_empty());

        let snap = store.metrics().snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.removals, 1);
    }

    #[tokio::test]
    async fn test_prefix_purge_stays_in_scope() {
        let store = MemoryCacheStore::with_defaults("test");
        fill(&store, &["/a", "/a/b", "/a/b;start=0;pageSize=5", "/ab", "/b"]).await;
        let other_tenant = KeyScope::new(TenantId(2), "u@db");
        store.put(other_tenant.key("/a/b"), ghost("/a/b")).await.unwrap();

        let removed = store
            .remove_matching(&scope(), &PathMatch::Prefix("/a/b".into()))
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);

        let remaining: Vec<_> = store
            .keys()
            .await
            .unwrap()
            .into_iter()
            .filter(|k| scope().contains(k))
            .filter_map(|k| k.path)
            .collect();
        assert_eq!(remaining, vec!["/a", "/ab", "/b"]);
        assert!(store.contains(&other_tenant.key("/a/b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_listing_purge() {
        let store = MemoryCacheStore::with_defaults("test");
        fill(
            &store,
            &[
                "/docs",
                "/docs;start=0;pageSize=10",
                "/docs;start=10;pageSize=10",
                "/docs/readme",
                "/docs2",
            ],
        )
        .await;

        let removed = store
            .remove_matching(&scope(), &PathMatch::listing("/docs").unwrap())
            .await
            .unwrap();
        assert_eq!(removed.len(), 3);
        assert!(store.contains(&scope().key("/docs/readme")).await.unwrap());
        assert!(store.contains(&scope().key("/docs2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_generation_guard_only_refuses_covered_keys() {
        let store = MemoryCacheStore::with_defaults("test");
        let key = scope().key("/a/f");
        let other_tenant = KeyScope::new(TenantId(2), "u@db");

        // Removals elsewhere leave the populate alone
        let generation = store.generation();
        store.remove(&scope().key("/unrelated")).await.unwrap();
        store.remove(&other_tenant.key("/a/f")).await.unwrap();
        store
            .remove_matching(&other_tenant, &PathMatch::Prefix("/a".into()))
            .await
            .unwrap();
        store
            .remove_matching(&scope(), &PathMatch::listing("/a").unwrap())
            .await
            .unwrap();
        assert!(store
            .put_if_generation(key.clone(), ghost("/a/f"), generation)
            .await
            .unwrap());

        // Exact and prefix removals of the key refuse it
        let generation = store.generation();
        store.remove(&key).await.unwrap();
        assert!(!store
            .put_if_generation(key.clone(), ghost("/a/f"), generation)
            .await
            .unwrap());

        let generation = store.generation();
        store
            .remove_matching(&scope(), &PathMatch::Prefix("/a".into()))
            .await
            .unwrap();
        assert!(!store
            .put_if_generation(key.clone(), ghost("/a/f"), generation)
            .await
            .unwrap());
        assert!(store.is_empty());
        assert_eq!(store.metrics().snapshot().rejected_populates, 2);

        let generation = store.generation();
        store.clear().await.unwrap();
        assert!(!store
            .put_if_generation(key.clone(), ghost("/a/f"), generation)
            .await
            .unwrap());

        let generation = store.generation();
        assert!(store.put_if_generation(key, ghost("/a/f"), generation).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_forgotten_removals_refuse_old_populates() {
        let store = MemoryCacheStore::with_defaults("test");
        let generation = store.generation();
        for i in 0..=REMOVAL_LOG_CAPACITY {
            store.remove(&scope().key(format!("/other/{i}"))).await.unwrap();
        }
        assert!(!store
            .put_if_generation(scope().key("/a"), ghost("/a"), generation)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_capacity_eviction_oldest_first() {
        let config = StoreConfig {
            max_entries: 2,
            ..Default::default()
        };
        let store = MemoryCacheStore::new("small", &config);
        let mut events = store.subscribe();

        fill(&store, &["/1", "/2", "/3"]).await;
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&scope().key("/1")).await.unwrap());
        assert_eq!(store.metrics().snapshot().evictions, 1);

        let mut saw_eviction = false;
        while let Ok(event) = events.try_recv() {
            if let CacheEvent::Evicted { reason, .. } = event {
                assert_eq!(reason, EvictionReason::Capacity);
                saw_eviction = true;
            }
        }
        assert!(saw_eviction);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let config = StoreConfig {
            ttl_seconds: Some(0),
            ..Default::default()
        };
        let store = MemoryCacheStore::new("ttl", &config);
        fill(&store, &["/a"]).await;
        assert!(store.get(&scope().key("/a")).await.unwrap().is_none());
        assert!(store.is_empty());
        assert_eq!(store.metrics().snapshot().evictions, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryCacheStore::with_defaults("test");
        fill(&store, &["/a", "/b"]).await;
        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert!(store.keys().await.unwrap().is_empty());
    }
}
