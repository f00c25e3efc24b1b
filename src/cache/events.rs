//! Cache Events
//!
//! Events emitted by a Cache Store. Subscribers can forward invalidations
//! to other nodes of a cluster.

use crate::cache::key::CacheKey;
use serde::{Deserialize, Serialize};

/// Events emitted by the cache system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEvent {
    /// Entry was stored
    Populated { key: String },

    /// Entries were removed by write invalidation
    Invalidated { keys: Vec<String> },

    /// Entry was dropped by the store itself
    Evicted {
        key: String,
        reason: EvictionReason,
    },

    /// The whole partition was cleared
    Cleared { entries_removed: u64 },
}

/// Reason for eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionReason {
    /// Capacity limit reached
    Capacity,
    /// Entry expired (TTL)
    Expired,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Capacity => write!(f, "capacity"),
            EvictionReason::Expired => write!(f, "expired"),
        }
    }
}

impl CacheEvent {
    pub fn populated(key: &CacheKey) -> Self {
        CacheEvent::Populated {
            key: key.to_string(),
        }
    }

    pub fn invalidated(keys: &[CacheKey]) -> Self {
        CacheEvent::Invalidated {
            keys: keys.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn evicted(key: &CacheKey, reason: EvictionReason) -> Self {
        CacheEvent::Evicted {
            key: key.to_string(),
            reason,
        }
    }

    /// Whether other nodes must drop entries because of this event
    pub fn is_invalidation(&self) -> bool {
        matches!(self, CacheEvent::Invalidated { .. } | CacheEvent::Cleared { .. })
    }
}
