//! Environment builtins: env, export, unset, history

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::registry::{ArgSchema, Args, Command, CommandContext};
use crate::state::StateUpdate;

/// `env`
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCommand;

#[async_trait]
impl Command for EnvCommand {
    fn name(&self) -> &str {
        "env"
    }

    fn summary(&self) -> &str {
        "print environment variables"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("env")
    }

    async fn run(&self, ctx: &CommandContext, _args: Args) -> Result<Option<StateUpdate>> {
        let listing: String = ctx
            .state
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect();
        ctx.out.emit(listing)?;
        Ok(None)
    }
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// `export NAME=VALUE...`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportCommand;

#[async_trait]
impl Command for ExportCommand {
    fn name(&self) -> &str {
        "export"
    }

    fn summary(&self) -> &str {
        "set environment variables"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("export NAME=VALUE...").at_least(1)
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let mut env = ctx.state.env.clone();
        for assignment in &args.positional {
            match assignment.split_once('=') {
                Some((name, value)) if valid_name(name) => {
                    env.insert(name.to_string(), value.to_string());
                }
                _ => {
                    return Err(Error::invalid_args(format!(
                        "export: `{assignment}`: not a valid NAME=VALUE assignment"
                    ))
                    .with_context("command", "export"));
                }
            }
        }
        Ok(Some(StateUpdate::env(env)))
    }
}

/// `unset NAME...`
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsetCommand;

#[async_trait]
impl Command for UnsetCommand {
    fn name(&self) -> &str {
        "unset"
    }

    fn summary(&self) -> &str {
        "remove environment variables"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("unset NAME...").at_least(1)
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let mut env = ctx.state.env.clone();
        for name in &args.positional {
            env.remove(name);
        }
        Ok(Some(StateUpdate::env(env)))
    }
}

/// `history`
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryCommand;

#[async_trait]
impl Command for HistoryCommand {
    fn name(&self) -> &str {
        "history"
    }

    fn summary(&self) -> &str {
        "print accepted input lines"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("history")
    }

    async fn run(&self, ctx: &CommandContext, _args: Args) -> Result<Option<StateUpdate>> {
        let listing: String = ctx
            .state
            .history
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:5}  {line}\n", i + 1))
            .collect();
        ctx.out.emit(listing)?;
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::testing::{context, run, take};
    use crate::error::ValidationReason;

    #[tokio::test]
    async fn test_export_env_unset() {
        let (mut ctx, out) = context().await;
        let update = run(&ExportCommand, &ctx, &["A=1", "B=x=y", "EMPTY="])
            .await
            .unwrap()
            .unwrap();
        ctx.state.apply(update);

        run(&EnvCommand, &ctx, &[]).await.unwrap();
        assert_eq!(take(&out), "A=1\nB=x=y\nEMPTY=\n");

        let update = run(&UnsetCommand, &ctx, &["A", "MISSING"])
            .await
            .unwrap()
            .unwrap();
        ctx.state.apply(update);
        assert!(!ctx.state.env.contains_key("A"));
        assert!(ctx.state.env.contains_key("B"));
    }

    #[tokio::test]
    async fn test_export_rejects_bad_names() {
        let (ctx, _out) = context().await;
        for bad in ["NOEQ", "=v", "1A=v", "A-B=v"] {
            let err = run(&ExportCommand, &ctx, &[bad]).await.unwrap_err();
            assert!(err.is(ValidationReason::InvalidArgs), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_history() {
        let (mut ctx, out) = context().await;
        ctx.state.history = vec!["pwd".into(), "history".into()];
        run(&HistoryCommand, &ctx, &[]).await.unwrap();
        assert_eq!(take(&out), "    1  pwd\n    2  history\n");
    }
}
