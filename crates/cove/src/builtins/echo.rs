//! echo builtin - print arguments

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::{ArgSchema, Args, Command, CommandContext};
use crate::state::StateUpdate;

/// `echo [-n] [TEXT]...`
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoCommand;

#[async_trait]
impl Command for EchoCommand {
    fn name(&self) -> &str {
        "echo"
    }

    fn summary(&self) -> &str {
        "print arguments separated by spaces"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("echo [-n] [TEXT]...")
            .at_least(0)
            .flag('n')
            .passthrough()
    }

    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let mut text = args.positional.join(" ");
        if !args.flag('n') {
            text.push('\n');
        }
        ctx.out.emit(text)?;
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::testing::{context, run, take};

    #[tokio::test]
    async fn test_echo() {
        let (ctx, out) = context().await;
        run(&EchoCommand, &ctx, &["hello", "world"]).await.unwrap();
        assert_eq!(take(&out), "hello world\n");

        run(&EchoCommand, &ctx, &["-n", "x"]).await.unwrap();
        assert_eq!(take(&out), "x");

        run(&EchoCommand, &ctx, &[]).await.unwrap();
        assert_eq!(take(&out), "\n");

        run(&EchoCommand, &ctx, &["-e", "x"]).await.unwrap();
        assert_eq!(take(&out), "-e x\n");
    }
}
