//! Registry Resources
//!
//! A resource carries a content blob and a string property map. A
//! collection is a resource that also carries (a page of) child paths.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Marker Properties
// =============================================================================

/// Set on symbolic links and on mount roots
pub const REGISTRY_LINK: &str = "registry.link";

/// Set on mount roots (which are links as well)
pub const REGISTRY_MOUNT: &str = "registry.mount";

/// Location of the content behind a link, `<url>/resourceContent?path=<path>`
pub const REGISTRY_REAL_PATH: &str = "registry.realpath";

/// Target path of a symbolic link
pub const REGISTRY_ACTUAL_PATH: &str = "registry.actualpath";

const REAL_PATH_MARKER: &str = "resourceContent?path=";

// =============================================================================
// Resource
// =============================================================================

/// A node in the registry tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Path the resource was read from
    pub path: String,
    /// Content blob
    pub content: Bytes,
    /// Media type hint
    pub media_type: Option<String>,
    /// Property map
    pub properties: BTreeMap<String, String>,
    /// Child paths, present only for collections
    pub children: Option<Vec<String>>,
    /// Total number of children (a paged read may carry fewer)
    pub child_count: usize,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
}

impl Resource {
    /// Create a plain resource
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            media_type: None,
            properties: BTreeMap::new(),
            children: None,
            child_count: 0,
            last_modified: Utc::now(),
        }
    }

    /// Create an empty collection
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            children: Some(Vec::new()),
            ..Self::new(path, Bytes::new())
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder-style media type setter
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Get a property value
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Set a property value
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Whether this resource is a collection
    pub fn is_collection(&self) -> bool {
        self.children.is_some()
    }

    /// Child paths of a collection (empty for plain resources)
    pub fn children(&self) -> &[String] {
        self.children.as_deref().unwrap_or_default()
    }

    /// Whether the resource carries the link marker
    pub fn is_link(&self) -> bool {
        self.properties.contains_key(REGISTRY_LINK)
    }

    /// Whether the resource is the root of a mounted sub-tree
    pub fn is_mount_root(&self) -> bool {
        self.properties.contains_key(REGISTRY_MOUNT)
    }

    /// Whether the resource may be stored in the cache.
    ///
    /// A bare link is never cached because its target can change
    /// independently of the link path. Mount roots are links too, but are
    /// stable and therefore cacheable.
    pub fn is_cacheable(&self) -> bool {
        !self.is_link() || self.is_mount_root()
    }

    /// Path of the content behind a link, decoded from the real-path property
    pub fn real_path(&self) -> Option<String> {
        let real = self.property(REGISTRY_REAL_PATH)?;
        let (_, encoded) = real.split_once(REAL_PATH_MARKER)?;
        urlencoding::decode(encoded).ok().map(|p| p.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cacheability() {
        let plain = Resource::new("/a", "hello");
        assert!(plain.is_cacheable());

        let link = Resource::new("/l", "x").with_property(REGISTRY_LINK, "true");
        assert!(link.is_link());
        assert!(!link.is_cacheable());

        let mount = Resource::collection("/m")
            .with_property(REGISTRY_LINK, "true")
            .with_property(REGISTRY_MOUNT, "true");
        assert!(mount.is_mount_root());
        assert!(mount.is_cacheable());
    }

    #[test]
    fn test_real_path_decoding() {
        let link = Resource::new("/l", "x")
            .with_property(REGISTRY_LINK, "true")
            .with_property(
                REGISTRY_REAL_PATH,
                "http://remote:9763/registry/resourceContent?path=%2Fx%2Fmy%20file",
            );
        assert_eq!(link.real_path().as_deref(), Some("/x/my file"));

        let no_marker = Resource::new("/l", "x").with_property(REGISTRY_REAL_PATH, "/x/y");
        assert_eq!(no_marker.real_path(), None);
    }

    #[test]
    fn test_collection_children() {
        let mut c = Resource::collection("/docs");
        assert!(c.is_collection());
        assert!(c.children().is_empty());
        c.children = Some(vec!["/docs/a".into()]);
        assert_eq!(c.children(), ["/docs/a".to_string()]);
        assert!(Resource::new("/f", "").children().is_empty());
    }
}
