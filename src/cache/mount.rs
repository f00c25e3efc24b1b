//! Mount Table
//!
//! Maps local path prefixes onto sub-trees served by another backend
//! connection or cache partition. Built once from configuration and
//! immutable afterwards.

use crate::config::{CacheConfig, DatabaseConfig};
use crate::domain::path;
use std::fmt;
use tracing::{info, warn};

// =============================================================================
// Connection Descriptor
// =============================================================================

/// Effective identity of a backend database connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionDescriptor {
    /// Database user (only the part before the first `@` is significant)
    pub username: Option<String>,
    /// Connection URL
    pub url: String,
}

impl ConnectionDescriptor {
    pub fn new(username: Option<&str>, url: impl Into<String>) -> Self {
        Self {
            username: username.map(str::to_string),
            url: url.into(),
        }
    }

    /// `user@url`, lower-cased
    pub fn identity(&self) -> String {
        let user = self
            .username
            .as_deref()
            .and_then(|u| u.split('@').next())
            .unwrap_or_default();
        format!("{}@{}", user, self.url).to_lowercase()
    }
}

impl From<&DatabaseConfig> for ConnectionDescriptor {
    fn from(db: &DatabaseConfig) -> Self {
        Self::new(db.username.as_deref(), db.url.clone())
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

// =============================================================================
// Mount Entry
// =============================================================================

/// What a mounted sub-tree is served by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    /// A remote registry sharing a database with a known descriptor
    Database(ConnectionDescriptor),
    /// A remote registry known only by its cache partition id
    CachePartition(String),
}

impl MountTarget {
    /// Connection identity used in cache keys
    pub fn identity(&self) -> String {
        match self {
            MountTarget::Database(descriptor) => descriptor.identity(),
            MountTarget::CachePartition(id) => id.to_lowercase(),
        }
    }

    pub fn is_database(&self) -> bool {
        matches!(self, MountTarget::Database(_))
    }
}

/// One mount: local prefix, remote prefix, remote identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub local_prefix: String,
    pub target_prefix: String,
    pub target: MountTarget,
}

impl MountEntry {
    /// Rewrite a local path onto the remote tree, if it lies under this mount
    pub fn translate(&self, local_path: &str) -> Option<String> {
        if !path::is_within(&self.local_prefix, local_path) {
            return None;
        }
        let suffix = &local_path[self.local_prefix.len()..];
        Some(format!("{}{}", self.target_prefix, suffix))
    }
}

/// Result of resolving a path against the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountMatch<'a> {
    pub entry: &'a MountEntry,
    /// The path rewritten onto the remote tree
    pub remote_path: String,
}

// =============================================================================
// Mount Table
// =============================================================================

/// Ordered, immutable set of mounts
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn new(entries: Vec<MountEntry>) -> Self {
        Self { entries }
    }

    /// Build the table from configuration, keeping configuration order.
    ///
    /// Mounts whose instance has neither a database nor a cache id are
    /// skipped.
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut entries = Vec::with_capacity(config.mounts.len());

        for mount in &config.mounts {
            let Some(instance) = config.remote_instance(&mount.instance_id) else {
                warn!(mount = %mount.path, instance = %mount.instance_id, "Mount references unknown instance");
                continue;
            };

            let target = if let Some(db) = instance.db_config.as_deref().and_then(|n| config.database(n)) {
                MountTarget::Database(ConnectionDescriptor::from(db))
            } else if let Some(cache_id) = &instance.cache_id {
                MountTarget::CachePartition(cache_id.clone())
            } else {
                warn!(mount = %mount.path, instance = %instance.id, "Mount instance has no database or cache id, not cache-aware");
                continue;
            };

            entries.push(MountEntry {
                local_prefix: path::normalize(&mount.path),
                target_prefix: path::normalize(&mount.target_path),
                target,
            });
        }

        info!(mounts = entries.len(), "Mount table built");
        Self { entries }
    }

    /// Resolve a path: first database mount that covers it, otherwise the
    /// first cache-partition mount, in configuration order.
    pub fn resolve(&self, local_path: &str) -> Option<MountMatch<'_>> {
        let covering = |database: bool| {
            self.entries
                .iter()
                .filter(move |e| e.target.is_database() == database)
                .find_map(|entry| {
                    entry
                        .translate(local_path)
                        .map(|remote_path| MountMatch { entry, remote_path })
                })
        };
        covering(true).or_else(|| covering(false))
    }

    /// Mounts whose local prefix lies strictly beneath `prefix`
    pub fn nested_within<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a MountEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.local_prefix != prefix && path::is_within(prefix, &e.local_prefix))
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
