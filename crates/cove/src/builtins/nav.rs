//! Navigation builtins: pwd, cd, ls

use async_trait::async_trait;

use crate::error::{Error, Result, VfsReason};
use crate::registry::{ArgSchema, Args, Command, CommandContext};
use crate::state::StateUpdate;
use crate::vfs::path;

/// `pwd`
#[derive(Debug, Clone, Copy, Default)]
pub struct PwdCommand;

#[async_trait]
impl Command for PwdCommand {
    fn name(&self) -> &str {
        "pwd"
    }

    fn summary(&self) -> &str {
        "print the working directory"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("pwd")
    }

    async fn run(&self, ctx: &CommandContext, _args: Args) -> Result<Option<StateUpdate>> {
        ctx.out.line(&ctx.state.cwd)?;
        Ok(None)
    }
}

/// `cd [DIR]`, defaulting to `$HOME` or `/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CdCommand;

#[async_trait]
impl Command for CdCommand {
    fn name(&self) -> &str {
        "cd"
    }

    fn summary(&self) -> &str {
        "change the working directory"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("cd [DIR]").between(0, 1)
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let target = match args.get(0) {
            Some(dir) => ctx.resolve(dir)?,
            None => ctx.resolve(ctx.state.env.get("HOME").map_or("/", String::as_str))?,
        };
        if !ctx.vfs.stat(&target).await?.is_dir() {
            return Err(Error::vfs(
                VfsReason::NotDirectory,
                format!("cd: {target}: not a directory"),
            )
            .with_context("path", &target));
        }
        Ok(Some(StateUpdate::cwd(target)))
    }
}

/// `ls [-a] [PATH]...`
#[derive(Debug, Clone, Copy, Default)]
pub struct LsCommand;

impl LsCommand {
    async fn list_one(
        &self,
        ctx: &CommandContext,
        target: &str,
        all: bool,
        header: bool,
    ) -> Result<()> {
        let meta = ctx.vfs.stat(target).await?;
        if !meta.is_dir() {
            return ctx.out.line(path::file_name(target).unwrap_or(target));
        }
        let mut listing = String::new();
        if header {
            listing.push_str(&format!("{target}:\n"));
        }
        for entry in ctx.vfs.list(target).await? {
            if !all && entry.name.starts_with('.') {
                continue;
            }
            listing.push_str(&entry.name);
            if entry.metadata.is_dir() {
                listing.push('/');
            }
            listing.push('\n');
        }
        ctx.out.emit(listing)
    }
}

#[async_trait]
impl Command for LsCommand {
    fn name(&self) -> &str {
        "ls"
    }

    fn summary(&self) -> &str {
        "list directory contents"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("ls [-a] [PATH]...").at_least(0).flag('a')
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let all = args.flag('a');
        if args.positional.is_empty() {
            self.list_one(ctx, &ctx.state.cwd, all, false).await?;
            return Ok(None);
        }
        let header = args.positional.len() > 1;
        for input in &args.positional {
            let target = ctx.resolve(input)?;
            self.list_one(ctx, &target, all, header).await?;
        }
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::testing::{context, run, take};

    #[tokio::test]
    async fn test_cd_and_pwd() {
        let (mut ctx, out) = context().await;
        ctx.vfs.create_dir_all("/a/b").await.unwrap();

        let update = run(&CdCommand, &ctx, &["a/b"]).await.unwrap();
        assert_eq!(update, Some(StateUpdate::cwd("/a/b")));
        ctx.state.apply(update.unwrap());

        run(&PwdCommand, &ctx, &[]).await.unwrap();
        assert_eq!(take(&out), "/a/b\n");

        let update = run(&CdCommand, &ctx, &[".."]).await.unwrap();
        assert_eq!(update, Some(StateUpdate::cwd("/a")));
    }

    #[tokio::test]
    async fn test_cd_defaults_to_home() {
        let (mut ctx, _out) = context().await;
        ctx.vfs.mkdir("/home").await.unwrap();
        assert_eq!(
            run(&CdCommand, &ctx, &[]).await.unwrap(),
            Some(StateUpdate::cwd("/"))
        );
        ctx.state.env.insert("HOME".into(), "/home".into());
        assert_eq!(
            run(&CdCommand, &ctx, &[]).await.unwrap(),
            Some(StateUpdate::cwd("/home"))
        );
    }

    #[tokio::test]
    async fn test_cd_errors() {
        let (ctx, _out) = context().await;
        ctx.vfs.write("/file", b"x").await.unwrap();
        let err = run(&CdCommand, &ctx, &["/missing"]).await.unwrap_err();
        assert!(err.is(VfsReason::NotFound));
        let err = run(&CdCommand, &ctx, &["/file"]).await.unwrap_err();
        assert!(err.is(VfsReason::NotDirectory));
    }

    #[tokio::test]
    async fn test_ls() {
        let (ctx, out) = context().await;
        ctx.vfs.mkdir("/d").await.unwrap();
        ctx.vfs.write("/f.txt", b"x").await.unwrap();
        ctx.vfs.write("/.hidden", b"x").await.unwrap();

        run(&LsCommand, &ctx, &[]).await.unwrap();
        assert_eq!(take(&out), "d/\nf.txt\n");

        run(&LsCommand, &ctx, &["-a", "/"]).await.unwrap();
        assert_eq!(take(&out), ".hidden\nd/\nf.txt\n");

        run(&LsCommand, &ctx, &["/f.txt"]).await.unwrap();
        assert_eq!(take(&out), "f.txt\n");

        run(&LsCommand, &ctx, &["/d", "/"]).await.unwrap();
        assert_eq!(take(&out), "/d:\n/:\nd/\nf.txt\n");
    }
}
