//! Storage adapter contract.
//!
//! An adapter is a storage backend mounted into the virtual namespace. It
//! receives adapter-relative paths: no leading slash, `/`-separated, already
//! normalized, with `.` naming the adapter root.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend-specific failure reported by an adapter.
///
/// The router translates these into the unified `vfs` reason set.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// File or directory not found
    #[error("not found: {0}")]
    NotFound(String),
    /// A path component is not a directory
    #[error("not a directory: {0}")]
    NotDirectory(String),
    /// Path is a directory
    #[error("is a directory: {0}")]
    IsDirectory(String),
    /// Path already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Directory is not empty
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    /// Path escapes the adapter root
    #[error("path escapes adapter root: {0}")]
    PathTraversal(String),
    /// Operation not supported by this backend
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// Backend refused access
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Invalid adapter options
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Any other backend error
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Kind of a filesystem entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

/// File/directory metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

impl Metadata {
    /// Metadata for a file of `size` bytes.
    pub fn file(size: u64) -> Self {
        Self {
            kind: EntryKind::File,
            size,
        }
    }

    /// Metadata for a directory.
    pub fn directory() -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
        }
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Returns true for files.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Directory entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (single path component).
    pub name: String,
    /// Entry metadata.
    pub metadata: Metadata,
}

/// A storage backend that can be mounted into the virtual namespace.
///
/// Implementations must be safe to call concurrently from unrelated sessions.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short name of the adapter kind (e.g. `"memory"`).
    fn kind(&self) -> &str;

    /// Read file contents.
    async fn read(&self, path: &str) -> AdapterResult<Vec<u8>>;

    /// Create or replace a file. The parent directory must exist.
    async fn write(&self, path: &str, data: &[u8]) -> AdapterResult<()>;

    /// Delete a file or an empty directory.
    async fn delete(&self, path: &str) -> AdapterResult<()>;

    /// List the entries of a directory.
    async fn list(&self, path: &str) -> AdapterResult<Vec<DirEntry>>;

    /// Get metadata for a path.
    async fn stat(&self, path: &str) -> AdapterResult<Metadata>;

    /// Create a single directory. The parent must exist.
    async fn mkdir(&self, path: &str) -> AdapterResult<()>;

    /// Check whether a path exists.
    async fn exists(&self, path: &str) -> AdapterResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(AdapterError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Rename a file within this adapter.
    ///
    /// The default copies then deletes; backends with a native rename
    /// should override it.
    async fn rename(&self, from: &str, to: &str) -> AdapterResult<()> {
        let data = self.read(from).await?;
        self.write(to, &data).await?;
        self.delete(from).await
    }

    /// Release any resources held by the adapter.
    ///
    /// Called exactly once when the adapter's mount is removed.
    async fn shutdown(&self) -> AdapterResult<()> {
        Ok(())
    }
}

/// Creates adapters of one kind from mount options.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// The kind name this factory handles.
    fn kind(&self) -> &str;

    /// Build a configured adapter from mount options.
    async fn configure(&self, options: &serde_json::Value)
    -> AdapterResult<Arc<dyn StorageAdapter>>;
}
