//! Virtual path normalization.
//!
//! Virtual paths are always absolute, use `/` as the only separator, have no
//! trailing slash (except the root) and contain no `.` or `..` components.

use crate::error::{Error, Result, VfsReason};

/// Normalize a virtual path.
///
/// Repeated separators collapse, `.` is dropped and `..` pops a component
/// (clamping at the root). A path without a leading `/` is taken relative to
/// the root.
pub fn normalize(path: &str) -> Result<String> {
    if path.contains('\0') {
        return Err(Error::vfs(VfsReason::PathTraversal, "path contains a NUL byte")
            .with_context("path", path.escape_debug()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}

/// Resolve a possibly-relative path against a working directory.
pub fn join(cwd: &str, input: &str) -> Result<String> {
    if input.starts_with('/') {
        normalize(input)
    } else if cwd == "/" {
        normalize(&format!("/{input}"))
    } else {
        normalize(&format!("{cwd}/{input}"))
    }
}

/// Parent of a normalized path. The root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Final component of a normalized path, `None` for the root.
pub fn file_name(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Strip `prefix` from `path` on a component boundary.
///
/// Returns the adapter-relative remainder (`.` when the paths are equal), or
/// `None` when `prefix` does not cover `path`.
pub fn strip_mount_prefix(path: &str, prefix: &str) -> Option<String> {
    if prefix == "/" {
        let rest = path.trim_start_matches('/');
        return Some(if rest.is_empty() {
            ".".to_string()
        } else {
            rest.to_string()
        });
    }
    if path == prefix {
        return Some(".".to_string());
    }
    path.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}

/// Join an adapter-relative path with a child name.
pub fn join_relative(base: &str, name: &str) -> String {
    if base == "." {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses() {
        assert_eq!(normalize("//a///b/").unwrap(), "/a/b");
        assert_eq!(normalize("/a/./b/.").unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("").unwrap(), "/");
    }

    #[test]
    fn test_normalize_clamps_at_root() {
        assert_eq!(normalize("/../../etc").unwrap(), "/etc");
        assert_eq!(normalize("a/b").unwrap(), "/a/b");
    }

    #[test]
    fn test_normalize_rejects_nul() {
        let err = normalize("/a\0b").unwrap_err();
        assert!(err.is(VfsReason::PathTraversal));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a").unwrap(), "/a");
        assert_eq!(join("/home", "docs/../x").unwrap(), "/home/x");
        assert_eq!(join("/home", "/abs").unwrap(), "/abs");
        assert_eq!(join("/home", "..").unwrap(), "/");
    }

    #[test]
    fn test_parent_and_file_name() {
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(file_name("/a/b.txt"), Some("b.txt"));
        assert_eq!(file_name("/"), None);
    }

    #[test]
    fn test_strip_mount_prefix() {
        assert_eq!(strip_mount_prefix("/", "/").as_deref(), Some("."));
        assert_eq!(strip_mount_prefix("/a/b", "/").as_deref(), Some("a/b"));
        assert_eq!(strip_mount_prefix("/data", "/data").as_deref(), Some("."));
        assert_eq!(strip_mount_prefix("/data/x/y", "/data").as_deref(), Some("x/y"));
        assert_eq!(strip_mount_prefix("/database", "/data"), None);
        assert_eq!(strip_mount_prefix("/other", "/data"), None);
    }
}
