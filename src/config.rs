//! Cache Configuration
//!
//! Mount table sources, no-cache rules and Cache Store sizing. Loaded once at
//! construction; a change requires a restart.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Partition used by the cache façade unless configured otherwise
pub const DEFAULT_PARTITION: &str = "registry-cache-backed";

// =============================================================================
// Database & Remote Instances
// =============================================================================

/// A database the registry (or a mounted remote registry) runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Name referenced by remote instances
    pub name: String,
    /// JDBC-style connection URL
    pub url: String,
    /// Database user
    #[serde(default)]
    pub username: Option<String>,
}

/// A remote registry instance that mounts can point at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInstanceConfig {
    pub id: String,
    /// Shared database of the remote instance
    #[serde(default)]
    pub db_config: Option<String>,
    /// Cache partition of the remote instance when no database is shared
    #[serde(default)]
    pub cache_id: Option<String>,
}

/// A mount of a remote instance's sub-tree under a local path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
    /// Local path prefix
    pub path: String,
    /// Path prefix on the remote instance
    pub target_path: String,
    /// Remote instance id
    pub instance_id: String,
}

// =============================================================================
// Store & Invalidation Settings
// =============================================================================

/// Settings for the in-memory Cache Store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Maximum number of entries before oldest-first eviction
    pub max_entries: usize,
    /// Entry time-to-live (None = no expiry)
    pub ttl_seconds: Option<u64>,
    /// Capacity of the cache event channel
    pub event_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_seconds: None,
            event_channel_capacity: 1024,
        }
    }
}

/// How far ancestor listings are purged after a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AncestorPurge {
    /// Purge every ancestor up to the root
    #[default]
    ToRoot,
    /// Stop at the first ancestor that had nothing cached
    StopAtUncached,
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Complete configuration of one cache subsystem instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Cache partition used by the façade
    pub partition: String,
    /// Identifier of this node, used for node-local keys
    pub node_identifier: String,
    /// Database of the local registry
    pub default_database: Option<DatabaseConfig>,
    /// Databases referenced by remote instances
    pub databases: Vec<DatabaseConfig>,
    /// Remote instances referenced by mounts
    pub remote_instances: Vec<RemoteInstanceConfig>,
    /// Mounts, in priority order
    pub mounts: Vec<MountConfig>,
    /// Paths (and their descendants) that are never cached
    pub no_cache_paths: Vec<String>,
    /// Cache Store settings
    pub store: StoreConfig,
    /// Ancestor purge policy
    pub ancestor_purge: AncestorPurge,
    /// Refuse populates that raced with an invalidation
    pub reject_stale_populates: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            partition: DEFAULT_PARTITION.to_string(),
            node_identifier: "node-0".to_string(),
            default_database: None,
            databases: Vec::new(),
            remote_instances: Vec::new(),
            mounts: Vec::new(),
            no_cache_paths: Vec::new(),
            store: StoreConfig::default(),
            ancestor_purge: AncestorPurge::default(),
            reject_stale_populates: true,
        }
    }
}

impl CacheConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Look up a database by name
    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.name == name)
    }

    /// Look up a remote instance by id
    pub fn remote_instance(&self, id: &str) -> Option<&RemoteInstanceConfig> {
        self.remote_instances.iter().find(|r| r.id == id)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.partition.is_empty() {
            return Err(Error::Configuration("partition name is empty".into()));
        }
        if self.store.max_entries == 0 {
            return Err(Error::Configuration("store.maxEntries must be > 0".into()));
        }

        for remote in &self.remote_instances {
            // Partition identities must not collide with user@url identities
            if remote.cache_id.as_deref().is_some_and(|id| id.contains('@')) {
                return Err(Error::Configuration(format!(
                    "remote instance {} has a cache id containing '@'",
                    remote.id
                )));
            }
            if let Some(db) = &remote.db_config {
                if self.database(db).is_none() {
                    return Err(Error::Configuration(format!(
                        "remote instance {} references unknown database {}",
                        remote.id, db
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        for mount in &self.mounts {
            if !mount.path.starts_with('/') || !mount.target_path.starts_with('/') {
                return Err(Error::Configuration(format!(
                    "mount {} -> {} must use absolute paths",
                    mount.path, mount.target_path
                )));
            }
            if !seen.insert(mount.path.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate mount path {}",
                    mount.path
                )));
            }
            if self.remote_instance(&mount.instance_id).is_none() {
                return Err(Error::Configuration(format!(
                    "mount {} references unknown instance {}",
                    mount.path, mount.instance_id
                )));
            }
        }

        for path in &self.no_cache_paths {
            if !path.starts_with('/') {
                return Err(Error::Configuration(format!(
                    "no-cache path {path} must be absolute"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// No-Cache Rules
// =============================================================================

/// Compiled no-cache rules.
///
/// A registered path disables caching for itself, its descendants and any
/// parameterised form of it (`/p`, `/p/...`, `/p;...`).
#[derive(Debug, Clone, Default)]
pub struct NoCacheRules {
    patterns: Vec<Regex>,
}

impl NoCacheRules {
    /// Compile rules from a list of paths
    pub fn new<S: AsRef<str>>(paths: &[S]) -> Result<Self> {
        let patterns = paths
            .iter()
            .map(|p| Regex::new(&format!("^{}($|/.*|;.*)$", regex::escape(p.as_ref()))))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether caching is disabled for `path`
    pub fn is_no_cache(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
