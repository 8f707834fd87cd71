//! Workspace mount table.
//!
//! The table maps `(workspace, mount path)` to a configured adapter. Lookups
//! take a shared read lock and never wait on adapter I/O; `mount` and
//! `unmount` are serialized per workspace.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use super::adapter::{AdapterFactory, StorageAdapter};
use super::local::LocalFactory;
use super::memory::MemoryFactory;
use super::path::{normalize, parent, strip_mount_prefix};
use super::router::VfsRouter;
use crate::error::{Error, Result, SessionReason, VfsReason};

/// A binding of a virtual path prefix to an adapter.
#[derive(Clone)]
pub struct Mount {
    path: String,
    kind: String,
    options: serde_json::Value,
    adapter: Arc<dyn StorageAdapter>,
}

impl fmt::Debug for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mount")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Mount {
    /// Normalized mount path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Adapter kind name.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Options the adapter was configured with.
    pub fn options(&self) -> &serde_json::Value {
        &self.options
    }

    /// The mounted adapter.
    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// Returns true if both mounts share the same adapter instance.
    pub fn same_adapter(&self, other: &Mount) -> bool {
        Arc::ptr_eq(&self.adapter, &other.adapter)
    }

    fn info(&self) -> MountInfo {
        MountInfo {
            path: self.path.clone(),
            kind: self.kind.clone(),
        }
    }
}

/// Public description of a mount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MountInfo {
    /// Normalized mount path.
    pub path: String,
    /// Adapter kind name.
    pub kind: String,
}

/// A path resolved to its mount.
#[derive(Clone, Debug)]
pub struct Resolved {
    /// The mount with the longest matching prefix.
    pub mount: Mount,
    /// Adapter-relative remainder (`.` for the mount root).
    pub relative: String,
}

#[derive(Default)]
struct WorkspaceMounts {
    mounts: RwLock<BTreeMap<String, Mount>>,
    writer: tokio::sync::Mutex<()>,
}

impl WorkspaceMounts {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Mount>> {
        self.mounts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Mount>> {
        self.mounts.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Concurrent table of mounts for every workspace.
pub struct MountTable {
    factories: RwLock<HashMap<String, Arc<dyn AdapterFactory>>>,
    workspaces: RwLock<HashMap<String, Arc<WorkspaceMounts>>>,
}

impl fmt::Debug for MountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        let workspaces: Vec<String> = self
            .workspaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("MountTable")
            .field("adapter_kinds", &kinds)
            .field("workspaces", &workspaces)
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

fn check_workspace(workspace: &str) -> Result<()> {
    if workspace.trim().is_empty() {
        return Err(Error::session(
            SessionReason::InvalidWorkspaceId,
            "workspace id must be a non-empty string",
        ));
    }
    Ok(())
}

impl MountTable {
    /// Create a table with the `memory` and `local` adapter kinds registered.
    pub fn new() -> Self {
        let table = Self {
            factories: RwLock::new(HashMap::new()),
            workspaces: RwLock::new(HashMap::new()),
        };
        table.register_adapter(MemoryFactory);
        table.register_adapter(LocalFactory);
        table
    }

    /// Register (or replace) an adapter kind.
    pub fn register_adapter(&self, factory: impl AdapterFactory + 'static) {
        let kind = factory.kind().to_string();
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::new(factory));
    }

    /// A router view of one workspace.
    pub fn router(self: &Arc<Self>, workspace: impl Into<String>) -> VfsRouter {
        VfsRouter::new(Arc::clone(self), workspace)
    }

    fn workspace(&self, workspace: &str) -> Option<Arc<WorkspaceMounts>> {
        self.workspaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workspace)
            .cloned()
    }

    fn workspace_or_create(&self, workspace: &str) -> Arc<WorkspaceMounts> {
        if let Some(existing) = self.workspace(workspace) {
            return existing;
        }
        let mut workspaces = self
            .workspaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(workspaces.entry(workspace.to_string()).or_default())
    }

    /// Mount a new adapter of `kind` at `path`.
    pub async fn mount(
        &self,
        workspace: &str,
        path: &str,
        kind: &str,
        options: serde_json::Value,
    ) -> Result<MountInfo> {
        check_workspace(workspace)?;
        let path = normalize(path)?;
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .cloned()
            .ok_or_else(|| {
                Error::vfs(
                    VfsReason::MountFailed,
                    format!("unknown adapter kind: {kind}"),
                )
                .with_context("path", &path)
            })?;

        let ws = self.workspace_or_create(workspace);
        let _guard = ws.writer.lock().await;
        if ws.read().contains_key(&path) {
            return Err(already_mounted(workspace, &path));
        }

        let adapter = factory.configure(&options).await.map_err(|e| {
            Error::vfs(VfsReason::MountFailed, e.to_string())
                .with_context("workspace", workspace)
                .with_context("path", &path)
                .with_context("kind", kind)
        })?;

        self.insert(workspace, &ws, path, kind.to_string(), options, adapter)
    }

    /// Mount an already configured adapter instance at `path`.
    pub async fn mount_adapter(
        &self,
        workspace: &str,
        path: &str,
        adapter: Arc<dyn StorageAdapter>,
    ) -> Result<MountInfo> {
        check_workspace(workspace)?;
        let path = normalize(path)?;
        let ws = self.workspace_or_create(workspace);
        let _guard = ws.writer.lock().await;
        if ws.read().contains_key(&path) {
            return Err(already_mounted(workspace, &path));
        }
        let kind = adapter.kind().to_string();
        self.insert(workspace, &ws, path, kind, serde_json::Value::Null, adapter)
    }

    fn insert(
        &self,
        workspace: &str,
        ws: &WorkspaceMounts,
        path: String,
        kind: String,
        options: serde_json::Value,
        adapter: Arc<dyn StorageAdapter>,
    ) -> Result<MountInfo> {
        let mount = Mount {
            path: path.clone(),
            kind,
            options,
            adapter,
        };
        let info = mount.info();
        ws.write().insert(path, mount);
        tracing::info!(workspace, path = %info.path, kind = %info.kind, "mounted adapter");
        Ok(info)
    }

    /// Remove the mount at `path` and shut its adapter down.
    pub async fn unmount(&self, workspace: &str, path: &str) -> Result<()> {
        check_workspace(workspace)?;
        let path = normalize(path)?;
        let not_found = || {
            Error::vfs(VfsReason::NotFound, format!("no mount at {path}"))
                .with_context("workspace", workspace)
        };
        let ws = self.workspace(workspace).ok_or_else(not_found)?;
        let _guard = ws.writer.lock().await;
        let mount = ws.write().remove(&path).ok_or_else(not_found)?;
        release(workspace, mount).await;
        Ok(())
    }

    /// Remove every mount of a workspace.
    pub async fn unmount_all(&self, workspace: &str) {
        let Some(ws) = self.workspace(workspace) else {
            return;
        };
        let _guard = ws.writer.lock().await;
        let mounts = std::mem::take(&mut *ws.write());
        for mount in mounts.into_values() {
            release(workspace, mount).await;
        }
    }

    /// Resolve a virtual path to its mount and adapter-relative path.
    ///
    /// Picks the mount with the longest prefix covering the normalized path.
    pub fn resolve(&self, workspace: &str, path: &str) -> Result<Resolved> {
        let path = normalize(path)?;
        let no_mount = || {
            Error::vfs(VfsReason::NoMount, format!("no mount covers {path}"))
                .with_context("workspace", workspace)
        };
        let ws = self.workspace(workspace).ok_or_else(no_mount)?;
        let mounts = ws.read();

        // Walk from the path up to the root so the first hit is the longest prefix.
        let mut candidate = path.as_str();
        loop {
            if let Some(mount) = mounts.get(candidate) {
                let relative = strip_mount_prefix(&path, candidate).unwrap_or_else(|| ".".into());
                return Ok(Resolved {
                    mount: mount.clone(),
                    relative,
                });
            }
            if candidate == "/" {
                return Err(no_mount());
            }
            candidate = parent(candidate);
        }
    }

    /// All mounts of a workspace, ordered by path.
    pub fn mounts(&self, workspace: &str) -> Vec<MountInfo> {
        self.workspace(workspace)
            .map(|ws| ws.read().values().map(Mount::info).collect())
            .unwrap_or_default()
    }

    /// Names of the first path component of every mount strictly below `dir`.
    pub(crate) fn child_mount_names(&self, workspace: &str, dir: &str) -> Vec<String> {
        let Some(ws) = self.workspace(workspace) else {
            return Vec::new();
        };
        let mut names: Vec<String> = ws
            .read()
            .keys()
            .filter_map(|mount_path| {
                let rest = strip_mount_prefix(mount_path, dir)?;
                if rest == "." {
                    return None;
                }
                rest.split('/').next().map(str::to_string)
            })
            .collect();
        names.dedup();
        names
    }
}

fn already_mounted(workspace: &str, path: &str) -> Error {
    Error::vfs(VfsReason::AlreadyExists, format!("{path} is already mounted"))
        .with_context("workspace", workspace)
}

async fn release(workspace: &str, mount: Mount) {
    if let Err(e) = mount.adapter.shutdown().await {
        tracing::warn!(workspace, path = %mount.path, error = %e, "adapter shutdown failed");
    }
    tracing::info!(workspace, path = %mount.path, kind = %mount.kind, "unmounted adapter");
}
