//! Built-in commands.
//!
//! These cover navigation, file manipulation over the VFS and environment
//! handling. Hosts register extra commands next to them on the same
//! [`CommandRegistry`].

mod echo;
mod env;
mod fs;
mod nav;
mod sleep;

pub use echo::EchoCommand;
pub use env::{EnvCommand, ExportCommand, HistoryCommand, UnsetCommand};
pub use fs::{CatCommand, CpCommand, MkdirCommand, MvCommand, RmCommand, WriteCommand};
pub use nav::{CdCommand, LsCommand, PwdCommand};
pub use sleep::SleepCommand;

use crate::registry::CommandRegistry;

/// Register all built-in commands.
pub fn register_builtins(registry: &mut CommandRegistry) {
    registry.register(EchoCommand);
    registry.register(PwdCommand);
    registry.register(CdCommand);
    registry.register(LsCommand);
    registry.register(CatCommand);
    registry.register(MkdirCommand);
    registry.register(WriteCommand);
    registry.register(RmCommand);
    registry.register(CpCommand);
    registry.register(MvCommand);
    registry.register(EnvCommand);
    registry.register(ExportCommand);
    registry.register(UnsetCommand);
    registry.register(HistoryCommand);
    registry.register(SleepCommand);
}
