//! Virtual filesystem: mount table, router and storage adapters.
//!
//! Every workspace owns a set of mounts. A mount binds a normalized virtual
//! path prefix to a [`StorageAdapter`]; the [`VfsRouter`] resolves a path to
//! the mount with the longest matching prefix and delegates to its adapter.
//!
//! ```text
//! /                  memory adapter
//! ├── /project/      local adapter (host directory)
//! └── /scratch/      memory adapter
//! ```

mod adapter;
mod local;
mod memory;
mod mount;
pub mod path;
mod router;

pub use adapter::{
    AdapterError, AdapterFactory, AdapterResult, DirEntry, EntryKind, Metadata, StorageAdapter,
};
pub use local::{LocalAdapter, LocalFactory};
pub use memory::{MemoryAdapter, MemoryFactory};
pub use mount::{Mount, MountInfo, MountTable, Resolved};
pub use router::VfsRouter;
