//! Unified file operations over a workspace's mounts.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::adapter::{AdapterError, DirEntry, Metadata};
use super::mount::{MountTable, Resolved};
use super::path::{join, normalize};
use crate::error::{Error, Result, VfsReason};

/// Translate an adapter failure into the unified `vfs` error set.
fn translate(err: AdapterError, path: &str, resolved: &Resolved) -> Error {
    let reason = match &err {
        AdapterError::NotFound(_) => VfsReason::NotFound,
        AdapterError::NotDirectory(_) => VfsReason::NotDirectory,
        AdapterError::IsDirectory(_) => VfsReason::IsDirectory,
        AdapterError::AlreadyExists(_) => VfsReason::AlreadyExists,
        AdapterError::DirectoryNotEmpty(_) => VfsReason::DirectoryNotEmpty,
        AdapterError::PathTraversal(_) => VfsReason::PathTraversal,
        AdapterError::Unsupported(_) => VfsReason::Unsupported,
        AdapterError::PermissionDenied(_)
        | AdapterError::InvalidOptions(_)
        | AdapterError::Io(_)
        | AdapterError::Backend(_) => VfsReason::Unknown,
    };
    Error::vfs(reason, format!("{path}: {err}"))
        .with_context("path", path)
        .with_context("mount", resolved.mount.path())
        .with_context("adapter", resolved.mount.kind())
}

/// File-operation API for one workspace.
///
/// Each call resolves its path once and delegates to the owning adapter.
#[derive(Clone)]
pub struct VfsRouter {
    table: Arc<MountTable>,
    workspace: String,
}

impl fmt::Debug for VfsRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VfsRouter")
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl VfsRouter {
    /// Create a router view of `workspace`.
    pub fn new(table: Arc<MountTable>, workspace: impl Into<String>) -> Self {
        Self {
            table,
            workspace: workspace.into(),
        }
    }

    /// The workspace this router operates on.
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    /// The underlying mount table.
    pub fn table(&self) -> &Arc<MountTable> {
        &self.table
    }

    /// Resolve a virtual path to its mount.
    pub fn resolve(&self, path: &str) -> Result<Resolved> {
        self.table.resolve(&self.workspace, path)
    }

    /// Read a file.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path)?;
        let r = self.resolve(&path)?;
        r.mount
            .adapter()
            .read(&r.relative)
            .await
            .map_err(|e| translate(e, &path, &r))
    }

    /// Create or replace a file.
    pub async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = normalize(path)?;
        let r = self.resolve(&path)?;
        r.mount
            .adapter()
            .write(&r.relative, data)
            .await
            .map_err(|e| translate(e, &path, &r))
    }

    /// Delete a file or an empty directory.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let r = self.resolve(&path)?;
        r.mount
            .adapter()
            .delete(&r.relative)
            .await
            .map_err(|e| translate(e, &path, &r))
    }

    /// List a directory, including mount points directly below it.
    pub async fn list(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize(path)?;
        let children = self.table.child_mount_names(&self.workspace, &path);
        let mut entries = match self.resolve(&path) {
            Ok(r) => match r.mount.adapter().list(&r.relative).await {
                Ok(entries) => entries,
                Err(AdapterError::NotFound(_)) if !children.is_empty() => Vec::new(),
                Err(e) => return Err(translate(e, &path, &r)),
            },
            Err(e) if e.is(VfsReason::NoMount) && !children.is_empty() => Vec::new(),
            Err(e) => return Err(e),
        };

        for name in children {
            if !entries.iter().any(|e| e.name == name) {
                entries.push(DirEntry {
                    name,
                    metadata: Metadata::directory(),
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Get metadata. Ancestors of mount points report as directories.
    pub async fn stat(&self, path: &str) -> Result<Metadata> {
        let path = normalize(path)?;
        let is_mount_ancestor = || {
            !self
                .table
                .child_mount_names(&self.workspace, &path)
                .is_empty()
        };
        match self.resolve(&path) {
            Ok(r) => match r.mount.adapter().stat(&r.relative).await {
                Ok(meta) => Ok(meta),
                Err(AdapterError::NotFound(_)) if is_mount_ancestor() => Ok(Metadata::directory()),
                Err(e) => Err(translate(e, &path, &r)),
            },
            Err(e) if e.is(VfsReason::NoMount) && is_mount_ancestor() => {
                Ok(Metadata::directory())
            }
            Err(e) => Err(e),
        }
    }

    /// Create a single directory.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let r = self.resolve(&path)?;
        r.mount
            .adapter()
            .mkdir(&r.relative)
            .await
            .map_err(|e| translate(e, &path, &r))
    }

    /// Create a directory and any missing ancestors.
    pub async fn create_dir_all(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            match self.stat(&current).await {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {
                    return Err(Error::vfs(
                        VfsReason::NotDirectory,
                        format!("{current}: not a directory"),
                    )
                    .with_context("path", &current));
                }
                Err(e) if e.is(VfsReason::NotFound) => self.mkdir(&current).await?,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Check whether a path exists.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is(VfsReason::NotFound) || e.is(VfsReason::NoMount) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Copy a file or directory tree.
    ///
    /// Content always flows through a read-then-write, so source and
    /// destination may live on different adapters.
    pub async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        check_not_inside(&from, &to)?;
        self.copy_tree(&from, &to).await
    }

    fn copy_tree<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let meta = self.stat(from).await?;
            if meta.is_file() {
                let data = self.read(from).await?;
                return self.write(to, &data).await;
            }

            if let Err(e) = self.mkdir(to).await {
                // merge into an existing directory
                if !e.is(VfsReason::AlreadyExists) || !self.stat(to).await?.is_dir() {
                    return Err(e);
                }
            }
            for entry in self.list(from).await? {
                let src = join(from, &entry.name)?;
                let dst = join(to, &entry.name)?;
                self.copy_tree(&src, &dst).await?;
            }
            Ok(())
        })
    }

    /// Move a file or directory tree.
    ///
    /// Within one adapter this uses the adapter's rename. Across adapters it
    /// copies and then deletes the source.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        check_not_inside(&from, &to)?;
        let src = self.resolve(&from)?;
        let dst = self.resolve(&to)?;

        if src.relative == "." {
            return Err(Error::vfs(
                VfsReason::Unsupported,
                format!("{from} is a mount point"),
            )
            .with_context("path", &from));
        }

        if src.mount.same_adapter(&dst.mount) {
            tracing::debug!(from = %from, to = %to, mount = %src.mount.path(), "rename within adapter");
            return src
                .mount
                .adapter()
                .rename(&src.relative, &dst.relative)
                .await
                .map_err(|e| translate(e, &from, &src));
        }

        tracing::debug!(
            from = %from,
            to = %to,
            src_mount = %src.mount.path(),
            dst_mount = %dst.mount.path(),
            "cross-adapter move"
        );
        self.copy_tree(&from, &to).await?;
        self.remove_all(&from).await
    }

    /// Delete a path, recursing into directories.
    pub async fn remove_all(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        self.remove_tree(&path).await
    }

    fn remove_tree<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.stat(path).await?.is_dir() {
                for entry in self.list(path).await? {
                    let child = join(path, &entry.name)?;
                    self.remove_tree(&child).await?;
                }
            }
            self.delete(path).await
        })
    }
}

fn check_not_inside(from: &str, to: &str) -> Result<()> {
    let inside = from == to || from == "/" || to.starts_with(&format!("{from}/"));
    if inside {
        return Err(Error::vfs(
            VfsReason::PathTraversal,
            format!("cannot copy or move {from} into {to}"),
        )
        .with_context("from", from)
        .with_context("to", to));
    }
    Ok(())
}
