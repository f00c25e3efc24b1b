//! Registry Path Helpers
//!
//! Registry paths are `/`-separated. Anything after the first `;` is a
//! parameter section: pagination windows (`;start=0;pageSize=10`), versions
//! (`;version:3`) and community features (`;comments`, `;tags`, `;ratings`).

/// The registry root
pub const ROOT_PATH: &str = "/";

/// Separator between path segments
pub const PATH_SEPARATOR: char = '/';

/// Separator between a path and its parameter section
pub const URL_SEPARATOR: char = ';';

/// Base path of resources local to a single registry node
pub const LOCAL_REPOSITORY_BASE_PATH: &str = "/_system/local";

/// Parameter marker used in version paths
pub const VERSION_PARAMETER: &str = ";version:";

const COMMUNITY_FEATURES: [&str; 3] = ["tags", "comments", "ratings"];

/// Normalize a path: leading `/`, no trailing `/` (except root), no `//`.
///
/// The parameter section, if any, is kept as-is.
pub fn normalize(path: &str) -> String {
    let (resource, params) = split_parameters(path);

    let mut prepared = if resource.starts_with(PATH_SEPARATOR) {
        resource.to_string()
    } else {
        format!("{PATH_SEPARATOR}{resource}")
    };
    while prepared.contains("//") {
        prepared = prepared.replace("//", "/");
    }
    if prepared.len() > 1 && prepared.ends_with(PATH_SEPARATOR) {
        prepared.pop();
    }

    match params {
        Some(params) => format!("{prepared}{URL_SEPARATOR}{params}"),
        None => prepared,
    }
}

/// Split a path into its resource part and its parameter section
pub fn split_parameters(path: &str) -> (&str, Option<&str>) {
    match path.split_once(URL_SEPARATOR) {
        Some((resource, params)) => (resource, Some(params)),
        None => (path, None),
    }
}

/// The resource part of a path (everything before the first `;`)
pub fn resource_part(path: &str) -> &str {
    split_parameters(path).0
}

/// Parent of a path; `None` for the root
pub fn parent_path(path: &str) -> Option<String> {
    if path == ROOT_PATH || path.is_empty() {
        return None;
    }
    let trimmed = path.strip_suffix(PATH_SEPARATOR).unwrap_or(path);
    match trimmed.rfind(PATH_SEPARATOR) {
        Some(idx) if idx > 0 => Some(trimmed[..idx].to_string()),
        _ => Some(ROOT_PATH.to_string()),
    }
}

/// Join a child name onto a parent path
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("{ROOT_PATH}{name}")
    } else {
        format!("{parent}{PATH_SEPARATOR}{name}")
    }
}

/// Path addressing one page of a collection listing
pub fn paginated(path: &str, start: usize, page_size: usize) -> String {
    format!("{path};start={start};pageSize={page_size}")
}

/// Whether `path` is `prefix` itself or lies beneath it.
///
/// Matching stops at segment or parameter boundaries, so `/a` covers
/// `/a/b` and `/a;start=0;pageSize=5` but not `/ab`.
pub fn is_within(prefix: &str, path: &str) -> bool {
    if prefix == ROOT_PATH {
        return path.starts_with(PATH_SEPARATOR);
    }
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with(PATH_SEPARATOR) || rest.starts_with(URL_SEPARATOR),
        None => false,
    }
}

/// Whether the request targets a tag, comment or rating sub-resource
pub fn is_community_feature_request(path: &str) -> bool {
    match split_parameters(path) {
        (_, Some(fragment)) => COMMUNITY_FEATURES.iter().any(|f| fragment.contains(f)),
        (_, None) => false,
    }
}

/// Build a version path (`/a/b;version:3`)
pub fn version_path(path: &str, version: u64) -> String {
    format!("{path}{VERSION_PARAMETER}{version}")
}

/// Parse a version path into the resource path and version number
pub fn parse_version_path(version_path: &str) -> Option<(&str, u64)> {
    let (path, version) = version_path.split_once(VERSION_PARAMETER)?;
    Some((path, version.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("/a/b/"), "/a/b");
        assert_eq!(normalize("//a///b"), "/a/b");
        assert_eq!(
            normalize("/docs/;start=0;pageSize=10"),
            "/docs;start=0;pageSize=10"
        );
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("/a").as_deref(), Some("/"));
        assert_eq!(parent_path("/a/b").as_deref(), Some("/a"));
        assert_eq!(parent_path("/a/b/").as_deref(), Some("/a"));
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a", "/a"));
        assert!(is_within("/a", "/a/b"));
        assert!(is_within("/a", "/a;start=0;pageSize=5"));
        assert!(!is_within("/a", "/ab"));
        assert!(is_within("/", "/anything"));
    }

    #[test]
    fn test_community_feature_detection() {
        assert!(is_community_feature_request("/a/b;comments"));
        assert!(is_community_feature_request("/a/b;tags:foo"));
        assert!(is_community_feature_request("/a/b;ratings:admin"));
        assert!(!is_community_feature_request("/a/tags/b"));
        assert!(!is_community_feature_request("/a;start=0;pageSize=10"));
    }

    #[test]
    fn test_version_paths() {
        let v = version_path("/a/b", 3);
        assert_eq!(v, "/a/b;version:3");
        assert_eq!(parse_version_path(&v), Some(("/a/b", 3)));
        assert_eq!(parse_version_path("/a/b"), None);
        assert_eq!(parse_version_path("/a/b;version:x"), None);
    }

    #[test]
    fn test_paginated_and_child() {
        assert_eq!(paginated("/docs", 0, 10), "/docs;start=0;pageSize=10");
        assert_eq!(child_path("/", "a"), "/a");
        assert_eq!(child_path("/a", "b"), "/a/b");
    }
}
