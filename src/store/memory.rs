//! In-Memory Registry
//!
//! A complete [`Registry`] kept in process memory. Used as the backing
//! store in tests and by the CLI. Links are resolved at read time, so a
//! link's content always reflects its target. Per-operation call counters
//! and an optional artificial latency make cache behaviour observable.

use crate::domain::path::{self, PATH_SEPARATOR, ROOT_PATH};
use crate::domain::resource::{REGISTRY_ACTUAL_PATH, REGISTRY_LINK, REGISTRY_MOUNT, REGISTRY_REAL_PATH};
use crate::domain::{Association, Comment, Registry, RequestContext, Resource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Links may point at links; give up after this many hops
const MAX_LINK_HOPS: usize = 16;

// =============================================================================
// Tree
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    content: Bytes,
    media_type: Option<String>,
    properties: BTreeMap<String, String>,
    collection: bool,
    last_modified: DateTime<Utc>,
}

impl Node {
    fn collection() -> Self {
        Self {
            content: Bytes::new(),
            media_type: None,
            properties: BTreeMap::new(),
            collection: true,
            last_modified: Utc::now(),
        }
    }

    fn from_resource(resource: &Resource) -> Self {
        Self {
            content: resource.content.clone(),
            media_type: resource.media_type.clone(),
            properties: resource.properties.clone(),
            collection: resource.is_collection(),
            last_modified: Utc::now(),
        }
    }

    /// Target of a link node
    fn link_target(&self) -> Option<&str> {
        if self.properties.contains_key(REGISTRY_LINK) {
            self.properties.get(REGISTRY_ACTUAL_PATH).map(String::as_str)
        } else {
            None
        }
    }
}

/// One entry of a dump, path relative to the dumped root
#[derive(Debug, Serialize, Deserialize)]
struct DumpEntry {
    path: String,
    node: Node,
}

#[derive(Debug, Clone, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    versions: BTreeMap<String, Vec<Node>>,
    associations: Vec<Association>,
    tags: BTreeMap<String, BTreeSet<String>>,
    comments: BTreeMap<String, Vec<Comment>>,
    ratings: BTreeMap<String, BTreeMap<String, u8>>,
}

impl Tree {
    fn new() -> Self {
        let mut tree = Self::default();
        tree.nodes.insert(ROOT_PATH.to_string(), Node::collection());
        tree
    }

    /// Paths of `path` and everything beneath it
    fn subtree(&self, path: &str) -> Vec<String> {
        self.nodes
            .range(path.to_string()..)
            .take_while(|(p, _)| p.starts_with(path))
            .filter(|(p, _)| path::is_within(path, p))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Direct child paths of `path`
    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == ROOT_PATH {
            ROOT_PATH.to_string()
        } else {
            format!("{path}{PATH_SEPARATOR}")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter(|(p, _)| p.len() > prefix.len() && !p[prefix.len()..].contains(PATH_SEPARATOR))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Create missing ancestors of `path` as collections
    fn ensure_parents(&mut self, path: &str) {
        let mut missing = Vec::new();
        let mut current = path::parent_path(path);
        while let Some(parent) = current {
            if self.nodes.contains_key(&parent) {
                break;
            }
            current = path::parent_path(&parent);
            missing.push(parent);
        }
        for parent in missing {
            self.nodes.insert(parent, Node::collection());
        }
    }

    /// Rewrite `path` through any link on its ancestors (and on the node
    /// itself when `follow_self`). Returns the data path.
    fn follow(&self, path: &str, follow_self: bool) -> Result<String> {
        let mut current = path.to_string();
        for _ in 0..MAX_LINK_HOPS {
            match self.first_link(&current, follow_self) {
                Some(rewritten) => current = rewritten,
                None => return Ok(current),
            }
        }
        Err(Error::backing_store("get", format!("too many link hops resolving {path}")))
    }

    fn first_link(&self, path: &str, follow_self: bool) -> Option<String> {
        let mut ancestor = String::new();
        for segment in path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()) {
            ancestor.push(PATH_SEPARATOR);
            ancestor.push_str(segment);
            if ancestor == path && !follow_self {
                return None;
            }
            if let Some(target) = self.nodes.get(&ancestor).and_then(Node::link_target) {
                let suffix = &path[ancestor.len()..];
                return Some(format!("{}{}", path::normalize(target), suffix));
            }
        }
        None
    }

    /// Move or copy the subtree at `from` to `to`
    fn transplant(&mut self, from: &str, to: &str, keep_source: bool) -> Result<()> {
        let paths = self.subtree(from);
        if paths.is_empty() {
            return Err(Error::ResourceNotFound {
                path: from.to_string(),
            });
        }
        self.ensure_parents(to);
        for old in paths {
            let node = if keep_source {
                self.nodes.get(&old).cloned()
            } else {
                self.nodes.remove(&old)
            };
            if let Some(node) = node {
                let new = format!("{}{}", to, &old[from.len()..]);
                self.nodes.insert(new, node);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Call Counters
// =============================================================================

/// Number of backing store calls per operation kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: u64,
    pub get_paged: u64,
    pub exists: u64,
    pub writes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    get: AtomicU64,
    get_paged: AtomicU64,
    exists: AtomicU64,
    writes: AtomicU64,
}

// =============================================================================
// In-Memory Registry
// =============================================================================

/// Registry kept entirely in memory
pub struct InMemoryRegistry {
    tree: RwLock<Tree>,
    transaction: Mutex<Option<Tree>>,
    url: String,
    latency: Option<Duration>,
    failing: AtomicBool,
    counters: Counters,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree::new()),
            transaction: Mutex::new(None),
            url: "http://localhost:9763/registry".to_string(),
            latency: None,
            failing: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Delay every read by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Base URL used in real-path properties of links
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Make reads fail with a backing store error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get: self.counters.get.load(Ordering::SeqCst),
            get_paged: self.counters.get_paged.load(Ordering::SeqCst),
            exists: self.counters.exists.load(Ordering::SeqCst),
            writes: self.counters.writes.load(Ordering::SeqCst),
        }
    }

    /// Mount `target` under `local` (a link that is also a mount root)
    pub fn mount(&self, local: &str, target: &str) {
        let local = path::normalize(local);
        let mut tree = self.tree.write();
        tree.ensure_parents(&local);
        let mut node = self.link_node(target);
        node.properties.insert(REGISTRY_MOUNT.to_string(), "true".to_string());
        tree.nodes.insert(local, node);
    }

    fn link_node(&self, target: &str) -> Node {
        let target = path::normalize(target);
        let mut node = Node::collection();
        node.collection = false;
        node.properties.insert(REGISTRY_LINK.to_string(), "true".to_string());
        node.properties.insert(
            REGISTRY_REAL_PATH.to_string(),
            format!("{}/resourceContent?path={}", self.url, urlencoding::encode(&target)),
        );
        node.properties.insert(REGISTRY_ACTUAL_PATH.to_string(), target);
        node
    }

    async fn read_call(&self, counter: &AtomicU64, operation: &str) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::backing_store(operation, "backing store unavailable"));
        }
        Ok(())
    }

    fn write_call(&self) {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Build the resource visible at `raw_path`
    fn load(&self, tree: &Tree, raw_path: &str) -> Result<Resource> {
        if path::is_community_feature_request(raw_path) {
            return self.community_view(tree, raw_path);
        }
        if let Some((resource_path, version)) = path::parse_version_path(raw_path) {
            let resource_path = path::normalize(resource_path);
            let node = version
                .checked_sub(1)
                .and_then(|i| tree.versions.get(&resource_path)?.get(i as usize))
                .ok_or_else(|| Error::ResourceNotFound {
                    path: raw_path.to_string(),
                })?;
            return Ok(to_resource(raw_path, node, None));
        }

        let visible = path::normalize(path::resource_part(raw_path));
        let parent_data = tree.follow(&visible, false)?;
        let own = tree.nodes.get(&parent_data).ok_or_else(|| Error::ResourceNotFound {
            path: visible.clone(),
        })?;

        let (data_path, link) = match own.link_target() {
            Some(_) => (tree.follow(&parent_data, true)?, Some(own)),
            None => (parent_data, None),
        };
        let node = tree.nodes.get(&data_path).ok_or_else(|| Error::ResourceNotFound {
            path: data_path.clone(),
        })?;

        let mut resource = to_resource(&visible, node, link);
        if node.collection {
            let children = tree
                .children(&data_path)
                .into_iter()
                .map(|child| {
                    let name = child[data_path.len()..].trim_start_matches(PATH_SEPARATOR);
                    path::child_path(&visible, name)
                })
                .collect::<Vec<_>>();
            resource.child_count = children.len();
            resource.children = Some(children);
        }
        Ok(resource)
    }

    fn community_view(&self, tree: &Tree, raw_path: &str) -> Result<Resource> {
        let (resource_path, fragment) = path::split_parameters(raw_path);
        let resource_path = path::normalize(resource_path);
        let fragment = fragment.unwrap_or_default();

        let resource = if fragment.contains("comments") {
            let mut listing = Resource::collection(raw_path);
            let paths: Vec<_> = tree
                .comments
                .get(&resource_path)
                .map(|c| c.iter().map(|c| c.path.clone()).collect())
                .unwrap_or_default();
            listing.child_count = paths.len();
            listing.children = Some(paths);
            listing
        } else if fragment.contains("tags") {
            let tags = tree
                .tags
                .get(&resource_path)
                .map(|t| t.iter().cloned().collect::<Vec<_>>().join(","))
                .unwrap_or_default();
            Resource::new(raw_path, tags)
        } else {
            let rating = average_rating(tree, &resource_path);
            Resource::new(raw_path, rating.to_string())
        };
        Ok(resource)
    }

    fn with_tree_mut<T>(&self, f: impl FnOnce(&mut Tree) -> Result<T>) -> Result<T> {
        self.write_call();
        let mut tree = self.tree.write();
        f(&mut tree)
    }
}

fn to_resource(visible: &str, node: &Node, link: Option<&Node>) -> Resource {
    let mut properties = node.properties.clone();
    if let Some(link) = link {
        properties.extend(link.properties.clone());
    }
    Resource {
        path: visible.to_string(),
        content: node.content.clone(),
        media_type: node.media_type.clone(),
        properties,
        children: node.collection.then(Vec::new),
        child_count: 0,
        last_modified: node.last_modified,
    }
}

fn average_rating(tree: &Tree, path: &str) -> f32 {
    match tree.ratings.get(path) {
        Some(ratings) if !ratings.is_empty() => {
            ratings.values().map(|r| f32::from(*r)).sum::<f32>() / ratings.len() as f32
        }
        _ => 0.0,
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn get(&self, _ctx: &RequestContext, path: &str) -> Result<Resource> {
        self.read_call(&self.counters.get, "get").await?;
        let tree = self.tree.read();
        self.load(&tree, path)
    }

    async fn get_paged(
        &self,
        _ctx: &RequestContext,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> Result<Resource> {
        self.read_call(&self.counters.get_paged, "getPaged").await?;
        let tree = self.tree.read();
        let mut resource = self.load(&tree, path)?;
        if let Some(children) = resource.children.take() {
            let page = children.into_iter().skip(start).take(page_size).collect();
            resource.children = Some(page);
        }
        Ok(resource)
    }

    async fn resource_exists(&self, _ctx: &RequestContext, path: &str) -> Result<bool> {
        self.read_call(&self.counters.exists, "resourceExists").await?;
        let tree = self.tree.read();
        match self.load(&tree, path) {
            Ok(_) => Ok(true),
            Err(Error::ResourceNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_metadata(&self, ctx: &RequestContext, path: &str) -> Result<Resource> {
        let mut resource = self.get(ctx, path).await?;
        resource.content = Bytes::new();
        Ok(resource)
    }

    async fn put(&self, _ctx: &RequestContext, raw_path: &str, resource: Resource) -> Result<String> {
        let visible = path::normalize(raw_path);
        self.with_tree_mut(|tree| {
            let data_path = tree.follow(&visible, false)?;

            // Writing to a symbolic link updates its target
            let target = tree
                .nodes
                .get(&data_path)
                .filter(|n| n.properties.contains_key(REGISTRY_LINK))
                .filter(|n| !n.properties.contains_key(REGISTRY_MOUNT))
                .and_then(Node::link_target)
                .map(path::normalize);

            let mut node = Node::from_resource(&resource);
            let write_path = match target {
                Some(target) => {
                    for key in [REGISTRY_LINK, REGISTRY_REAL_PATH, REGISTRY_ACTUAL_PATH] {
                        node.properties.remove(key);
                    }
                    target
                }
                None => data_path,
            };

            tree.ensure_parents(&write_path);
            debug!(path = %write_path, "Stored resource");
            tree.nodes.insert(write_path, node);
            Ok(visible.clone())
        })
    }

    async fn import_resource(
        &self,
        ctx: &RequestContext,
        suggested_path: &str,
        source_url: &str,
        resource: Resource,
    ) -> Result<String> {
        let resource = resource.with_property("registry.import.source", source_url);
        self.put(ctx, suggested_path, resource).await
    }

    async fn delete(&self, _ctx: &RequestContext, raw_path: &str) -> Result<()> {
        let visible = path::normalize(raw_path);
        if visible == ROOT_PATH {
            return Err(Error::InvalidPath("the root collection cannot be deleted".into()));
        }
        self.with_tree_mut(|tree| {
            let data_path = tree.follow(&visible, false)?;
            let paths = tree.subtree(&data_path);
            if paths.is_empty() {
                return Err(Error::ResourceNotFound { path: visible.clone() });
            }
            for p in paths {
                tree.nodes.remove(&p);
                tree.tags.remove(&p);
                tree.comments.remove(&p);
                tree.ratings.remove(&p);
            }
            Ok(())
        })
    }

    async fn rename(&self, ctx: &RequestContext, current_path: &str, new_name: &str) -> Result<String> {
        let current = path::normalize(current_path);
        let target = if new_name.starts_with(PATH_SEPARATOR) {
            path::normalize(new_name)
        } else {
            let parent = path::parent_path(&current).unwrap_or_else(|| ROOT_PATH.to_string());
            path::child_path(&parent, new_name)
        };
        self.move_resource(ctx, &current, &target).await
    }

    async fn move_resource(&self, _ctx: &RequestContext, current_path: &str, new_path: &str) -> Result<String> {
        let from = path::normalize(current_path);
        let to = path::normalize(new_path);
        self.with_tree_mut(|tree| {
            if tree.nodes.contains_key(&to) {
                return Err(Error::backing_store("move", format!("{to} already exists")));
            }
            tree.transplant(&from, &to, false)?;
            Ok(to.clone())
        })
    }

    async fn copy(&self, _ctx: &RequestContext, source_path: &str, target_path: &str) -> Result<String> {
        let from = path::normalize(source_path);
        let to = path::normalize(target_path);
        self.with_tree_mut(|tree| {
            tree.transplant(&from, &to, true)?;
            Ok(to.clone())
        })
    }

    async fn create_link(&self, _ctx: &RequestContext, raw_path: &str, target: &str) -> Result<()> {
        let visible = path::normalize(raw_path);
        let node = self.link_node(target);
        self.with_tree_mut(|tree| {
            tree.ensure_parents(&visible);
            tree.nodes.insert(visible.clone(), node);
            Ok(())
        })
    }

    async fn remove_link(&self, _ctx: &RequestContext, raw_path: &str) -> Result<()> {
        let visible = path::normalize(raw_path);
        self.with_tree_mut(|tree| {
            let is_link = tree.nodes.get(&visible).map(|n| n.link_target().is_some());
            match is_link {
                Some(true) => {
                    tree.nodes.remove(&visible);
                    Ok(())
                }
                Some(false) => Err(Error::InvalidPath(format!("{visible} is not a link"))),
                None => Err(Error::ResourceNotFound { path: visible.clone() }),
            }
        })
    }

    async fn restore(&self, _ctx: &RequestContext, raw_path: &str, dump: &str) -> Result<()> {
        let root = path::normalize(raw_path);
        let entries: Vec<DumpEntry> = serde_json::from_str(dump)?;
        self.with_tree_mut(|tree| {
            for p in tree.subtree(&root) {
                tree.nodes.remove(&p);
            }
            tree.ensure_parents(&root);
            for entry in entries {
                let target = format!("{}{}", root, entry.path).replace("//", "/");
                tree.nodes.insert(path::normalize(&target), entry.node);
            }
            if !tree.nodes.contains_key(&root) {
                tree.nodes.insert(root.clone(), Node::collection());
            }
            Ok(())
        })
    }

    async fn dump(&self, _ctx: &RequestContext, raw_path: &str) -> Result<String> {
        let root = path::normalize(raw_path);
        let tree = self.tree.read();
        let entries: Vec<DumpEntry> = tree
            .subtree(&root)
            .into_iter()
            .filter_map(|p| {
                tree.nodes.get(&p).map(|node| DumpEntry {
                    path: p[root.len()..].to_string(),
                    node: node.clone(),
                })
            })
            .collect();
        if entries.is_empty() {
            return Err(Error::ResourceNotFound { path: root });
        }
        Ok(serde_json::to_string(&entries)?)
    }

    async fn create_version(&self, _ctx: &RequestContext, raw_path: &str) -> Result<()> {
        let visible = path::normalize(raw_path);
        self.with_tree_mut(|tree| {
            let node = tree
                .nodes
                .get(&visible)
                .cloned()
                .ok_or_else(|| Error::ResourceNotFound { path: visible.clone() })?;
            tree.versions.entry(visible.clone()).or_default().push(node);
            Ok(())
        })
    }

    async fn get_versions(&self, _ctx: &RequestContext, raw_path: &str) -> Result<Vec<String>> {
        let visible = path::normalize(raw_path);
        let tree = self.tree.read();
        let count = tree.versions.get(&visible).map(Vec::len).unwrap_or(0);
        Ok((1..=count as u64)
            .rev()
            .map(|v| path::version_path(&visible, v))
            .collect())
    }

    async fn restore_version(&self, _ctx: &RequestContext, version_path: &str) -> Result<()> {
        let (resource_path, version) = path::parse_version_path(version_path)
            .ok_or_else(|| Error::InvalidPath(format!("{version_path} is not a version path")))?;
        let visible = path::normalize(resource_path);
        self.with_tree_mut(|tree| {
            let node = version
                .checked_sub(1)
                .and_then(|i| tree.versions.get(&visible)?.get(i as usize))
                .cloned()
                .ok_or_else(|| Error::ResourceNotFound {
                    path: version_path.to_string(),
                })?;
            tree.ensure_parents(&visible);
            tree.nodes.insert(visible.clone(), node);
            Ok(())
        })
    }

    async fn add_association(
        &self,
        _ctx: &RequestContext,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> Result<()> {
        let association = Association {
            source_path: path::normalize(source_path),
            target_path: path::normalize(target_path),
            association_type: association_type.to_string(),
        };
        self.with_tree_mut(|tree| {
            if !tree.associations.contains(&association) {
                tree.associations.push(association);
            }
            Ok(())
        })
    }

    async fn remove_association(
        &self,
        _ctx: &RequestContext,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> Result<()> {
        let source = path::normalize(source_path);
        let target = path::normalize(target_path);
        self.with_tree_mut(|tree| {
            tree.associations.retain(|a| {
                !(a.source_path == source && a.target_path == target && a.association_type == association_type)
            });
            Ok(())
        })
    }

    async fn get_associations(&self, _ctx: &RequestContext, raw_path: &str) -> Result<Vec<Association>> {
        let visible = path::normalize(raw_path);
        let tree = self.tree.read();
        Ok(tree
            .associations
            .iter()
            .filter(|a| a.source_path == visible || a.target_path == visible)
            .cloned()
            .collect())
    }

    async fn apply_tag(&self, _ctx: &RequestContext, raw_path: &str, tag: &str) -> Result<()> {
        let visible = path::normalize(raw_path);
        self.with_tree_mut(|tree| {
            tree.tags.entry(visible.clone()).or_default().insert(tag.to_string());
            Ok(())
        })
    }

    async fn remove_tag(&self, _ctx: &RequestContext, raw_path: &str, tag: &str) -> Result<()> {
        let visible = path::normalize(raw_path);
        self.with_tree_mut(|tree| {
            if let Some(tags) = tree.tags.get_mut(&visible) {
                tags.remove(tag);
            }
            Ok(())
        })
    }

    async fn get_tags(&self, _ctx: &RequestContext, raw_path: &str) -> Result<Vec<String>> {
        let visible = path::normalize(raw_path);
        let tree = self.tree.read();
        Ok(tree
            .tags
            .get(&visible)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_comment(&self, ctx: &RequestContext, raw_path: &str, text: &str) -> Result<String> {
        let visible = path::normalize(raw_path);
        let user = ctx.user.clone();
        self.with_tree_mut(|tree| {
            let comments = tree.comments.entry(visible.clone()).or_default();
            let comment_path = format!("{};comments:{}", visible, comments.len() + 1);
            comments.push(Comment {
                path: comment_path.clone(),
                resource_path: visible.clone(),
                user,
                text: text.to_string(),
                created_at: Utc::now(),
            });
            Ok(comment_path)
        })
    }

    async fn get_comments(&self, _ctx: &RequestContext, raw_path: &str) -> Result<Vec<Comment>> {
        let visible = path::normalize(raw_path);
        let tree = self.tree.read();
        Ok(tree.comments.get(&visible).cloned().unwrap_or_default())
    }

    async fn rate_resource(&self, ctx: &RequestContext, raw_path: &str, rating: u8) -> Result<()> {
        if !(1..=5).contains(&rating) {
            return Err(Error::backing_store(
                "rateResource",
                format!("rating {rating} is outside 1..=5"),
            ));
        }
        let visible = path::normalize(raw_path);
        let user = ctx.user.clone();
        self.with_tree_mut(|tree| {
            tree.ratings.entry(visible.clone()).or_default().insert(user, rating);
            Ok(())
        })
    }

    async fn get_average_rating(&self, _ctx: &RequestContext, raw_path: &str) -> Result<f32> {
        let visible = path::normalize(raw_path);
        Ok(average_rating(&self.tree.read(), &visible))
    }

    async fn begin_transaction(&self, _ctx: &RequestContext) -> Result<()> {
        let mut transaction = self.transaction.lock();
        if transaction.is_some() {
            return Err(Error::backing_store("beginTransaction", "a transaction is already active"));
        }
        *transaction = Some(self.tree.read().clone());
        Ok(())
    }

    async fn commit_transaction(&self, _ctx: &RequestContext) -> Result<()> {
        self.transaction
            .lock()
            .take()
            .map(|_| ())
            .ok_or_else(|| Error::backing_store("commitTransaction", "no active transaction"))
    }

    async fn rollback_transaction(&self, _ctx: &RequestContext) -> Result<()> {
        let snapshot = self
            .transaction
            .lock()
            .take()
            .ok_or_else(|| Error::backing_store("rollbackTransaction", "no active transaction"))?;
        *self.tree.write() = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TenantId;
    use assert_matches::assert_matches;

    fn ctx() -> RequestContext {
        RequestContext::new("alice", TenantId(1))
    }

    #[tokio::test]
    async fn test_put_get_and_listing() {
        let reg = InMemoryRegistry::new();
        reg.put(&ctx(), "/docs/a", Resource::new("", "A")).await.unwrap();
        reg.put(&ctx(), "/docs/b", Resource::new("", "B")).await.unwrap();

        let a = reg.get(&ctx(), "/docs/a").await.unwrap();
        assert_eq!(a.content, Bytes::from("A"));
        assert_eq!(a.path, "/docs/a");

        let docs = reg.get(&ctx(), "/docs").await.unwrap();
        assert_eq!(docs.children(), ["/docs/a".to_string(), "/docs/b".to_string()]);

        let page = reg.get_paged(&ctx(), "/docs", 1, 10).await.unwrap();
        assert_eq!(page.children(), ["/docs/b".to_string()]);
        assert_eq!(page.child_count, 2);

        let root = reg.get(&ctx(), "/").await.unwrap();
        assert_eq!(root.children(), ["/docs".to_string()]);

        assert_eq!(
            reg.calls(),
            CallCounts {
                get: 3,
                get_paged: 1,
                exists: 0,
                writes: 2
            }
        );
    }

    #[tokio::test]
    async fn test_links_resolve_at_read_time() {
        let reg = InMemoryRegistry::new().with_url("http://r:1/registry");
        reg.put(&ctx(), "/t/f", Resource::new("", "v1")).await.unwrap();
        reg.create_link(&ctx(), "/l", "/t").await.unwrap();

        let link = reg.get(&ctx(), "/l").await.unwrap();
        assert!(link.is_link());
        assert!(!link.is_mount_root());
        assert_eq!(link.real_path().as_deref(), Some("/t"));
        assert_eq!(link.children(), ["/l/f".to_string()]);

        let through = reg.get(&ctx(), "/l/f").await.unwrap();
        assert_eq!(through.content, Bytes::from("v1"));

        reg.put(&ctx(), "/t/f", Resource::new("", "v2")).await.unwrap();
        assert_eq!(reg.get(&ctx(), "/l/f").await.unwrap().content, Bytes::from("v2"));

        reg.remove_link(&ctx(), "/l").await.unwrap();
        assert_matches!(reg.get(&ctx(), "/l/f").await, Err(Error::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_mount_roots() {
        let reg = InMemoryRegistry::new();
        reg.put(&ctx(), "/x/f", Resource::new("", "remote")).await.unwrap();
        reg.mount("/a", "/x");

        let root = reg.get(&ctx(), "/a").await.unwrap();
        assert!(root.is_mount_root());
        assert!(root.is_cacheable());
        assert_eq!(reg.get(&ctx(), "/a/f").await.unwrap().content, Bytes::from("remote"));

        reg.put(&ctx(), "/a/g", Resource::new("", "new")).await.unwrap();
        assert!(reg.resource_exists(&ctx(), "/x/g").await.unwrap());
    }

    #[tokio::test]
    async fn test_move_copy_rename_delete() {
        let reg = InMemoryRegistry::new();
        reg.put(&ctx(), "/s/f", Resource::new("", "x")).await.unwrap();

        reg.copy(&ctx(), "/s", "/c").await.unwrap();
        assert!(reg.resource_exists(&ctx(), "/c/f").await.unwrap());

        let moved = reg.move_resource(&ctx(), "/s", "/m").await.unwrap();
        assert_eq!(moved, "/m");
        assert!(!reg.resource_exists(&ctx(), "/s/f").await.unwrap());

        let renamed = reg.rename(&ctx(), "/m/f", "g").await.unwrap();
        assert_eq!(renamed, "/m/g");

        reg.delete(&ctx(), "/m").await.unwrap();
        assert!(!reg.resource_exists(&ctx(), "/m/g").await.unwrap());
        assert_matches!(reg.delete(&ctx(), "/m").await, Err(Error::ResourceNotFound { .. }));
        assert_matches!(reg.delete(&ctx(), "/").await, Err(Error::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_versions_and_dump_restore() {
        let reg = InMemoryRegistry::new();
        reg.put(&ctx(), "/v", Resource::new("", "one")).await.unwrap();
        reg.create_version(&ctx(), "/v").await.unwrap();
        reg.put(&ctx(), "/v", Resource::new("", "two")).await.unwrap();

        let versions = reg.get_versions(&ctx(), "/v").await.unwrap();
        assert_eq!(versions, vec!["/v;version:1".to_string()]);
        assert_eq!(reg.get(&ctx(), "/v;version:1").await.unwrap().content, Bytes::from("one"));

        reg.restore_version(&ctx(), "/v;version:1").await.unwrap();
        assert_eq!(reg.get(&ctx(), "/v").await.unwrap().content, Bytes::from("one"));

        reg.put(&ctx(), "/d/a", Resource::new("", "a")).await.unwrap();
        let dump = reg.dump(&ctx(), "/d").await.unwrap();
        reg.delete(&ctx(), "/d").await.unwrap();
        reg.restore(&ctx(), "/e", &dump).await.unwrap();
        assert_eq!(reg.get(&ctx(), "/e/a").await.unwrap().content, Bytes::from("a"));
    }

    #[tokio::test]
    async fn test_community_features() {
        let reg = InMemoryRegistry::new();
        reg.put(&ctx(), "/r", Resource::new("", "x")).await.unwrap();

        reg.apply_tag(&ctx(), "/r", "blue").await.unwrap();
        assert_eq!(reg.get_tags(&ctx(), "/r").await.unwrap(), vec!["blue".to_string()]);
        assert_eq!(reg.get(&ctx(), "/r;tags").await.unwrap().content, Bytes::from("blue"));

        let comment = reg.add_comment(&ctx(), "/r", "nice").await.unwrap();
        assert_eq!(comment, "/r;comments:1");
        let listing = reg.get(&ctx(), "/r;comments").await.unwrap();
        assert_eq!(listing.children(), [comment]);

        reg.rate_resource(&ctx(), "/r", 4).await.unwrap();
        reg.rate_resource(&RequestContext::new("bob", TenantId(1)), "/r", 2)
            .await
            .unwrap();
        assert_eq!(reg.get_average_rating(&ctx(), "/r").await.unwrap(), 3.0);
        assert_matches!(
            reg.rate_resource(&ctx(), "/r", 9).await,
            Err(Error::BackingStore { .. })
        );

        reg.add_association(&ctx(), "/r", "/q", "depends").await.unwrap();
        assert_eq!(reg.get_associations(&ctx(), "/q").await.unwrap().len(), 1);
        reg.remove_association(&ctx(), "/r", "/q", "depends").await.unwrap();
        assert!(reg.get_associations(&ctx(), "/q").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transactions() {
        let reg = InMemoryRegistry::new();
        reg.begin_transaction(&ctx()).await.unwrap();
        reg.put(&ctx(), "/tmp", Resource::new("", "x")).await.unwrap();
        reg.rollback_transaction(&ctx()).await.unwrap();
        assert!(!reg.resource_exists(&ctx(), "/tmp").await.unwrap());

        reg.begin_transaction(&ctx()).await.unwrap();
        reg.put(&ctx(), "/kept", Resource::new("", "x")).await.unwrap();
        reg.commit_transaction(&ctx()).await.unwrap();
        assert!(reg.resource_exists(&ctx(), "/kept").await.unwrap());

        assert_matches!(reg.commit_transaction(&ctx()).await, Err(Error::BackingStore { .. }));
    }

    #[tokio::test]
    async fn test_failing_reads() {
        let reg = InMemoryRegistry::new();
        reg.set_failing(true);
        let err = reg.get(&ctx(), "/").await.unwrap_err();
        assert!(err.is_backing_store());
        assert_eq!(reg.calls().get, 1);
    }
}
