//! Cove: sandboxed virtual shell sessions
//!
//! Cove lets humans and agents share an interactive command workspace
//! without touching the host's filesystem or network. A [`SessionHandle`]
//! owns one shell (working directory, environment, history) and runs one
//! command line at a time against a workspace's virtual filesystem, under a
//! per-run [`SandboxPolicy`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cove::{CommandRegistry, MountTable, SandboxPolicy, SessionConfig, SessionHandle};
//!
//! # async fn demo() -> cove::Result<()> {
//! let mounts = Arc::new(MountTable::new());
//! mounts.mount("ws", "/", "memory", serde_json::Value::Null).await?;
//!
//! let session = SessionHandle::start(
//!     SessionConfig::new("s1", "ws"),
//!     mounts,
//!     Arc::new(CommandRegistry::with_builtins()),
//! )
//! .await?;
//! session.run_and_wait("mkdir /a; write /a/f.txt hi", SandboxPolicy::new()).await?;
//! assert_eq!(session.run_and_wait("cat /a/f.txt", SandboxPolicy::new()).await?, "hi");
//! # Ok(())
//! # }
//! ```

pub mod builtins;
mod error;
mod event;
mod limits;
pub mod parser;
mod policy;
mod registry;
mod runner;
mod session;
mod state;
pub mod vfs;

pub use error::{
    Category, CommandReason, Error, Reason, Result, SessionReason, ShellReason, ValidationReason,
    VfsReason,
};
pub use event::SessionEvent;
pub use limits::{OutputBudget, ResourceLimits};
pub use policy::{Intent, NetworkPolicy, PolicyDecision, SandboxPolicy, authorize};
pub use registry::{ArgSchema, Args, Command, CommandContext, CommandRegistry, Emitter, OutputSink};
pub use runner::{CommandRunner, Execution};
pub use session::{
    SessionConfig, SessionHandle, SessionRegistry, SessionSnapshot, Subscription,
};
pub use state::{ShellState, StateUpdate};
pub use vfs::{MountTable, VfsRouter};
