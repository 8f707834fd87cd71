//! File builtins over the VFS: cat, mkdir, write, rm, cp, mv

use async_trait::async_trait;

use crate::error::{Error, Result, VfsReason};
use crate::registry::{ArgSchema, Args, Command, CommandContext};
use crate::state::StateUpdate;
use crate::vfs::path;

/// `cat PATH...`
#[derive(Debug, Clone, Copy, Default)]
pub struct CatCommand;

#[async_trait]
impl Command for CatCommand {
    fn name(&self) -> &str {
        "cat"
    }

    fn summary(&self) -> &str {
        "print file contents"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("cat PATH...").at_least(1)
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        for input in &args.positional {
            let data = ctx.vfs.read(&ctx.resolve(input)?).await?;
            ctx.out.emit(String::from_utf8_lossy(&data))?;
        }
        Ok(None)
    }
}

/// `mkdir [-p] PATH...`
#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirCommand;

#[async_trait]
impl Command for MkdirCommand {
    fn name(&self) -> &str {
        "mkdir"
    }

    fn summary(&self) -> &str {
        "create directories"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("mkdir [-p] PATH...").at_least(1).flag('p')
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        for input in &args.positional {
            let target = ctx.resolve(input)?;
            if args.flag('p') {
                ctx.vfs.create_dir_all(&target).await?;
            } else {
                ctx.vfs.mkdir(&target).await?;
            }
        }
        Ok(None)
    }
}

/// `write PATH [TEXT]...`: replace a file with the joined text.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteCommand;

#[async_trait]
impl Command for WriteCommand {
    fn name(&self) -> &str {
        "write"
    }

    fn summary(&self) -> &str {
        "write text to a file"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("write PATH [TEXT]...")
            .at_least(1)
            .passthrough()
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let target = ctx.resolve(args.require(0)?)?;
        let text = args.rest(1).join(" ");
        ctx.vfs.write(&target, text.as_bytes()).await?;
        Ok(None)
    }
}

/// `rm [-r] PATH...`
#[derive(Debug, Clone, Copy, Default)]
pub struct RmCommand;

#[async_trait]
impl Command for RmCommand {
    fn name(&self) -> &str {
        "rm"
    }

    fn summary(&self) -> &str {
        "remove files or directories"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("rm [-r] PATH...").at_least(1).flag('r')
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let recursive = args.flag('r');
        for input in &args.positional {
            let target = ctx.resolve(input)?;
            if target == "/" {
                return Err(Error::vfs(VfsReason::Unsupported, "rm: refusing to remove /")
                    .with_context("path", &target));
            }
            if recursive {
                ctx.vfs.remove_all(&target).await?;
                continue;
            }
            if ctx.vfs.stat(&target).await?.is_dir() {
                return Err(Error::vfs(
                    VfsReason::IsDirectory,
                    format!("rm: {target}: is a directory"),
                )
                .with_context("path", &target));
            }
            ctx.vfs.delete(&target).await?;
        }
        Ok(None)
    }
}

/// Source and destination paths; an existing directory destination
/// receives the source under its own name.
async fn transfer_paths(ctx: &CommandContext, args: &Args) -> Result<(String, String)> {
    let from = ctx.resolve(args.require(0)?)?;
    let mut to = ctx.resolve(args.require(1)?)?;
    if let Ok(meta) = ctx.vfs.stat(&to).await
        && meta.is_dir()
        && let Some(name) = path::file_name(&from)
    {
        to = path::join(&to, name)?;
    }
    Ok((from, to))
}

/// `cp SRC DST`, copying directories recursively.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpCommand;

#[async_trait]
impl Command for CpCommand {
    fn name(&self) -> &str {
        "cp"
    }

    fn summary(&self) -> &str {
        "copy a file or directory"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("cp SRC DST").exactly(2)
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let (from, to) = transfer_paths(ctx, &args).await?;
        ctx.vfs.copy(&from, &to).await?;
        Ok(None)
    }
}

/// `mv SRC DST`
#[derive(Debug, Clone, Copy, Default)]
pub struct MvCommand;

#[async_trait]
impl Command for MvCommand {
    fn name(&self) -> &str {
        "mv"
    }

    fn summary(&self) -> &str {
        "move or rename a file or directory"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("mv SRC DST").exactly(2)
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let (from, to) = transfer_paths(ctx, &args).await?;
        ctx.vfs.rename(&from, &to).await?;
        Ok(None)
    }
}
