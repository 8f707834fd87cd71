//! Host directory storage adapter.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::adapter::{
    AdapterError, AdapterFactory, AdapterResult, DirEntry, Metadata, StorageAdapter,
};

/// Adapter exposing a host directory.
///
/// All paths are confined to the root directory; anything resolving outside
/// it (including through symlinks) fails with
/// [`AdapterError::PathTraversal`].
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    root: PathBuf,
}

fn map_io(err: io::Error, path: &str) -> AdapterError {
    match err.kind() {
        io::ErrorKind::NotFound => AdapterError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => AdapterError::AlreadyExists(path.to_string()),
        io::ErrorKind::PermissionDenied => AdapterError::PermissionDenied(path.to_string()),
        io::ErrorKind::NotADirectory => AdapterError::NotDirectory(path.to_string()),
        io::ErrorKind::IsADirectory => AdapterError::IsDirectory(path.to_string()),
        io::ErrorKind::DirectoryNotEmpty => AdapterError::DirectoryNotEmpty(path.to_string()),
        _ => AdapterError::Io(err),
    }
}

impl LocalAdapter {
    /// Open a host directory as an adapter root.
    pub async fn open(root: impl AsRef<Path>) -> AdapterResult<Self> {
        let root = root.as_ref();
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| AdapterError::InvalidOptions(format!("{}: {e}", root.display())))?;
        let meta = tokio::fs::metadata(&root).await?;
        if !meta.is_dir() {
            return Err(AdapterError::InvalidOptions(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// The canonical host root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, rel: &str) -> AdapterResult<PathBuf> {
        let mut path = self.root.clone();
        if rel == "." {
            return Ok(path);
        }
        for component in rel.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(AdapterError::PathTraversal(rel.to_string()));
            }
            path.push(component);
        }
        Ok(path)
    }

    /// Map a relative path to a host path, rejecting symlink escapes.
    ///
    /// Every existing component is checked with `symlink_metadata`; a symlink
    /// must canonicalize to somewhere under the root. Dangling symlinks are
    /// refused, except as the final component when `follow_last` is false.
    async fn resolve_with(&self, rel: &str, follow_last: bool) -> AdapterResult<PathBuf> {
        let path = self.host_path(rel)?;
        let Ok(suffix) = path.strip_prefix(&self.root) else {
            return Ok(path);
        };
        let components: Vec<_> = suffix.components().collect();
        let mut current = self.root.clone();
        for (i, component) in components.iter().enumerate() {
            current.push(component);
            let meta = match tokio::fs::symlink_metadata(&current).await {
                Ok(meta) => meta,
                // nothing below a missing component can be a link
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(map_io(e, rel)),
            };
            if !meta.file_type().is_symlink() {
                continue;
            }
            let last = i + 1 == components.len();
            if last && !follow_last {
                break;
            }
            match tokio::fs::canonicalize(&current).await {
                Ok(real) if real.starts_with(&self.root) => current = real,
                Ok(_) => return Err(AdapterError::PathTraversal(rel.to_string())),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(path = rel, "refusing dangling symlink");
                    return Err(AdapterError::PathTraversal(rel.to_string()));
                }
                Err(e) => return Err(map_io(e, rel)),
            }
        }
        Ok(path)
    }

    async fn resolve(&self, rel: &str) -> AdapterResult<PathBuf> {
        self.resolve_with(rel, true).await
    }

    async fn metadata(&self, host: &Path, rel: &str) -> AdapterResult<std::fs::Metadata> {
        tokio::fs::metadata(host).await.map_err(|e| map_io(e, rel))
    }
}

fn to_metadata(meta: &std::fs::Metadata) -> Metadata {
    if meta.is_dir() {
        Metadata::directory()
    } else {
        Metadata::file(meta.len())
    }
}

#[async_trait]
impl StorageAdapter for LocalAdapter {
    fn kind(&self) -> &str {
        "local"
    }

    async fn read(&self, path: &str) -> AdapterResult<Vec<u8>> {
        let host = self.resolve(path).await?;
        if self.metadata(&host, path).await?.is_dir() {
            return Err(AdapterError::IsDirectory(path.to_string()));
        }
        tokio::fs::read(&host).await.map_err(|e| map_io(e, path))
    }

    async fn write(&self, path: &str, data: &[u8]) -> AdapterResult<()> {
        let host = self.resolve(path).await?;
        match tokio::fs::metadata(&host).await {
            Ok(meta) if meta.is_dir() => return Err(AdapterError::IsDirectory(path.to_string())),
            _ => {}
        }
        if let Some(parent) = host.parent() {
            let meta = tokio::fs::metadata(parent).await.map_err(|e| map_io(e, path))?;
            if !meta.is_dir() {
                return Err(AdapterError::NotDirectory(path.to_string()));
            }
        }
        tokio::fs::write(&host, data).await.map_err(|e| map_io(e, path))
    }

    async fn delete(&self, path: &str) -> AdapterResult<()> {
        if path == "." {
            return Err(AdapterError::Unsupported(
                "cannot delete the adapter root".to_string(),
            ));
        }
        // removing a link never touches its target
        let host = self.resolve_with(path, false).await?;
        let meta = tokio::fs::symlink_metadata(&host)
            .await
            .map_err(|e| map_io(e, path))?;
        if meta.is_dir() {
            tokio::fs::remove_dir(&host).await.map_err(|e| map_io(e, path))
        } else {
            tokio::fs::remove_file(&host).await.map_err(|e| map_io(e, path))
        }
    }

    async fn list(&self, path: &str) -> AdapterResult<Vec<DirEntry>> {
        let host = self.resolve(path).await?;
        if !self.metadata(&host, path).await?.is_dir() {
            return Err(AdapterError::NotDirectory(path.to_string()));
        }

        let mut reader = tokio::fs::read_dir(&host)
            .await
            .map_err(|e| map_io(e, path))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                // dangling symlink
                Err(_) => continue,
            };
            entries.push(DirEntry {
                name,
                metadata: to_metadata(&meta),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> AdapterResult<Metadata> {
        let host = self.resolve(path).await?;
        Ok(to_metadata(&self.metadata(&host, path).await?))
    }

    async fn mkdir(&self, path: &str) -> AdapterResult<()> {
        let host = self.resolve(path).await?;
        tokio::fs::create_dir(&host)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> AdapterResult<()> {
        let src = self.resolve(from).await?;
        let dst = self.resolve(to).await?;
        tokio::fs::rename(&src, &dst)
            .await
            .map_err(|e| map_io(e, from))
    }
}

/// Factory for the `local` adapter kind.
///
/// Options: `{ "root": "<host directory>" }`.
#[derive(Debug, Default, Clone)]
pub struct LocalFactory;

#[async_trait]
impl AdapterFactory for LocalFactory {
    fn kind(&self) -> &str {
        "local"
    }

    async fn configure(
        &self,
        options: &serde_json::Value,
    ) -> AdapterResult<Arc<dyn StorageAdapter>> {
        let root = options
            .get("root")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AdapterError::InvalidOptions("missing string option `root`".into()))?;
        Ok(Arc::new(LocalAdapter::open(root).await?))
    }
}
