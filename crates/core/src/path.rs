//! Absolute path helpers
//!
//! Paths are `/`-separated, start with `/`, and never end with `/` except
//! for the root path itself.

/// The root path
pub const ROOT: &str = "/";

/// Join a parent path and a child name
pub fn concat(parent: &str, name: &str) -> String {
    if parent == ROOT || parent.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Join a parent path and a relative path
pub fn concat_relative(parent: &str, relative: &str) -> String {
    relative
        .split('/')
        .filter(|e| !e.is_empty())
        .fold(parent.to_string(), |acc, e| concat(&acc, e))
}

/// Parent of a path; the root is its own parent
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(i) => &path[..i],
    }
}

/// Last element of a path; empty for the root
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Path elements, root first
pub fn elements(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|e| !e.is_empty())
}

/// Number of elements in the path
pub fn depth(path: &str) -> usize {
    elements(path).count()
}

/// Strip a trailing slash and make the path absolute
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        ROOT.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// True if `ancestor` is a strict ancestor of `path`
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == path {
        return false;
    }
    if ancestor == ROOT {
        return path.starts_with('/');
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// True if `ancestor` equals `path` or is an ancestor of it
pub fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    ancestor == path || is_ancestor(ancestor, path)
}

/// True if one path is an ancestor-or-self of the other
pub fn is_related(a: &str, b: &str) -> bool {
    is_ancestor_or_self(a, b) || is_ancestor(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_and_split() {
        assert_eq!(concat("/", "a"), "/a");
        assert_eq!(concat("/a", "b"), "/a/b");
        assert_eq!(concat_relative("/a", "b/c"), "/a/b/c");
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(name("/a/b"), "b");
        assert_eq!(name("/"), "");
        assert_eq!(depth("/a/b/c"), 3);
        assert_eq!(depth("/"), 0);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a/b/"), "/a/b");
        assert_eq!(normalize("a"), "/a");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn test_ancestry() {
        assert!(is_ancestor("/", "/a"));
        assert!(is_ancestor("/a", "/a/b"));
        assert!(!is_ancestor("/a", "/ab"));
        assert!(!is_ancestor("/a", "/a"));
        assert!(is_ancestor_or_self("/a", "/a"));
        assert!(is_related("/a/b", "/a"));
        assert!(!is_related("/a/b", "/a/c"));
    }
}
