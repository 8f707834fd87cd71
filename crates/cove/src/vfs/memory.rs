//! In-memory storage adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::adapter::{
    AdapterError, AdapterFactory, AdapterResult, DirEntry, Metadata, StorageAdapter,
};
use super::path::join_relative;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

/// Ephemeral adapter keeping a file tree in memory.
///
/// The adapter root (`.`) always exists as a directory.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    nodes: RwLock<BTreeMap<String, Node>>,
}

fn rel_parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => ".",
    }
}

fn child_prefix(path: &str) -> String {
    if path == "." {
        String::new()
    } else {
        format!("{path}/")
    }
}

static ROOT: Node = Node::Dir;

fn lookup<'a>(nodes: &'a BTreeMap<String, Node>, path: &str) -> Option<&'a Node> {
    if path == "." {
        return Some(&ROOT);
    }
    nodes.get(path)
}

/// Check that `path`'s parent exists and is a directory.
fn check_parent(nodes: &BTreeMap<String, Node>, path: &str) -> AdapterResult<()> {
    let parent = rel_parent(path);
    match lookup(nodes, parent) {
        Some(Node::Dir) => Ok(()),
        Some(Node::File(_)) => Err(AdapterError::NotDirectory(parent.to_string())),
        None => Err(AdapterError::NotFound(parent.to_string())),
    }
}

fn has_children(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
    let prefix = child_prefix(path);
    nodes
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(k, _)| k.starts_with(&prefix))
}

impl MemoryAdapter {
    /// Create an empty in-memory adapter.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn read(&self, path: &str) -> AdapterResult<Vec<u8>> {
        let nodes = self.nodes.read().await;
        match lookup(&nodes, path) {
            Some(Node::File(data)) => Ok(data.clone()),
            Some(Node::Dir) => Err(AdapterError::IsDirectory(path.to_string())),
            None => Err(AdapterError::NotFound(path.to_string())),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> AdapterResult<()> {
        let mut nodes = self.nodes.write().await;
        if let Some(Node::Dir) = lookup(&nodes, path) {
            return Err(AdapterError::IsDirectory(path.to_string()));
        }
        check_parent(&nodes, path)?;
        nodes.insert(path.to_string(), Node::File(data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &str) -> AdapterResult<()> {
        if path == "." {
            return Err(AdapterError::Unsupported(
                "cannot delete the adapter root".to_string(),
            ));
        }
        let mut nodes = self.nodes.write().await;
        let is_dir = match nodes.get(path) {
            None => return Err(AdapterError::NotFound(path.to_string())),
            Some(node) => matches!(node, Node::Dir),
        };
        if is_dir && has_children(&nodes, path) {
            return Err(AdapterError::DirectoryNotEmpty(path.to_string()));
        }
        nodes.remove(path);
        Ok(())
    }

    async fn list(&self, path: &str) -> AdapterResult<Vec<DirEntry>> {
        let nodes = self.nodes.read().await;
        match lookup(&nodes, path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => return Err(AdapterError::NotDirectory(path.to_string())),
            None => return Err(AdapterError::NotFound(path.to_string())),
        }

        let prefix = child_prefix(path);
        let entries = nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, node)| {
                let name = &k[prefix.len()..];
                if name.contains('/') {
                    return None;
                }
                let metadata = match node {
                    Node::File(data) => Metadata::file(data.len() as u64),
                    Node::Dir => Metadata::directory(),
                };
                Some(DirEntry {
                    name: name.to_string(),
                    metadata,
                })
            })
            .collect();
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> AdapterResult<Metadata> {
        let nodes = self.nodes.read().await;
        match lookup(&nodes, path) {
            Some(Node::File(data)) => Ok(Metadata::file(data.len() as u64)),
            Some(Node::Dir) => Ok(Metadata::directory()),
            None => Err(AdapterError::NotFound(path.to_string())),
        }
    }

    async fn mkdir(&self, path: &str) -> AdapterResult<()> {
        let mut nodes = self.nodes.write().await;
        if lookup(&nodes, path).is_some() {
            return Err(AdapterError::AlreadyExists(path.to_string()));
        }
        check_parent(&nodes, path)?;
        nodes.insert(path.to_string(), Node::Dir);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> AdapterResult<()> {
        if from == "." || to == "." {
            return Err(AdapterError::Unsupported(
                "cannot rename the adapter root".to_string(),
            ));
        }
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get(from)
            .cloned()
            .ok_or_else(|| AdapterError::NotFound(from.to_string()))?;
        if let Some(Node::Dir) = nodes.get(to) {
            return Err(AdapterError::IsDirectory(to.to_string()));
        }
        if to.starts_with(&child_prefix(from)) {
            return Err(AdapterError::PathTraversal(format!(
                "cannot move {from} into itself"
            )));
        }
        check_parent(&nodes, to)?;

        if let Node::Dir = node {
            let prefix = child_prefix(from);
            let moved: Vec<(String, Node)> = nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, child) in moved {
                nodes.remove(&key);
                let rest = &key[prefix.len()..];
                nodes.insert(join_relative(to, rest), child);
            }
        }
        nodes.remove(from);
        nodes.insert(to.to_string(), node);
        Ok(())
    }
}

/// Factory for the `memory` adapter kind. Options are ignored.
#[derive(Debug, Default, Clone)]
pub struct MemoryFactory;

#[async_trait]
impl AdapterFactory for MemoryFactory {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn configure(
        &self,
        _options: &serde_json::Value,
    ) -> AdapterResult<Arc<dyn StorageAdapter>> {
        Ok(Arc::new(MemoryAdapter::new()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read() {
        let fs = MemoryAdapter::new();
        fs.write("a.txt", b"hello").await.unwrap();
        assert_eq!(fs.read("a.txt").await.unwrap(), b"hello");
        assert_eq!(fs.stat("a.txt").await.unwrap(), Metadata::file(5));
    }

    #[tokio::test]
    async fn test_write_requires_parent() {
        let fs = MemoryAdapter::new();
        let err = fs.write("missing/a.txt", b"x").await.unwrap_err();
        assert!(matches!(err, AdapterError::NotFound(p) if p == "missing"));

        fs.write("file", b"x").await.unwrap();
        let err = fs.write("file/a.txt", b"x").await.unwrap_err();
        assert!(matches!(err, AdapterError::NotDirectory(_)));
    }

    #[tokio::test]
    async fn test_mkdir_and_list() {
        let fs = MemoryAdapter::new();
        fs.mkdir("a").await.unwrap();
        fs.mkdir("a/b").await.unwrap();
        fs.write("a/f.txt", b"hi").await.unwrap();
        fs.write("top.txt", b"").await.unwrap();

        let names: Vec<_> = fs
            .list("a")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b", "f.txt"]);

        let root: Vec<_> = fs
            .list(".")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(root, vec!["a", "top.txt"]);

        let err = fs.mkdir("a").await.unwrap_err();
        assert!(matches!(err, AdapterError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_read_directory_fails() {
        let fs = MemoryAdapter::new();
        fs.mkdir("d").await.unwrap();
        assert!(matches!(
            fs.read("d").await.unwrap_err(),
            AdapterError::IsDirectory(_)
        ));
        assert!(matches!(
            fs.list("nope").await.unwrap_err(),
            AdapterError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_non_empty_directory() {
        let fs = MemoryAdapter::new();
        fs.mkdir("d").await.unwrap();
        fs.write("d/x", b"1").await.unwrap();
        assert!(matches!(
            fs.delete("d").await.unwrap_err(),
            AdapterError::DirectoryNotEmpty(_)
        ));
        fs.delete("d/x").await.unwrap();
        fs.delete("d").await.unwrap();
        assert!(!fs.exists("d").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_directory_moves_children() {
        let fs = MemoryAdapter::new();
        fs.mkdir("src").await.unwrap();
        fs.mkdir("src/nested").await.unwrap();
        fs.write("src/nested/f", b"data").await.unwrap();

        fs.rename("src", "dst").await.unwrap();
        assert!(!fs.exists("src").await.unwrap());
        assert_eq!(fs.read("dst/nested/f").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_rename_into_itself_rejected() {
        let fs = MemoryAdapter::new();
        fs.mkdir("a").await.unwrap();
        assert!(matches!(
            fs.rename("a", "a/b").await.unwrap_err(),
            AdapterError::PathTraversal(_)
        ));
    }
}
