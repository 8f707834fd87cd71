//! sleep builtin

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::registry::{ArgSchema, Args, Command, CommandContext};
use crate::state::StateUpdate;

/// `sleep SECONDS`; fractional seconds are accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepCommand;

#[async_trait]
impl Command for SleepCommand {
    fn name(&self) -> &str {
        "sleep"
    }

    fn summary(&self) -> &str {
        "wait for a number of seconds"
    }

    fn schema(&self) -> ArgSchema {
        ArgSchema::new("sleep SECONDS").exactly(1)
    }

    async fn run(&self, _ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>> {
        let raw = args.require(0)?;
        let duration = raw
            .parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| {
                Error::invalid_args(format!("sleep: invalid time interval `{raw}`"))
                    .with_context("command", "sleep")
            })?;
        tokio::time::sleep(duration).await;
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::testing::{context, run};
    use crate::error::ValidationReason;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_waits() {
        let (ctx, _out) = context().await;
        let start = tokio::time::Instant::now();
        run(&SleepCommand, &ctx, &["1.5"]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_sleep_rejects_invalid() {
        let (ctx, _out) = context().await;
        for bad in ["-1", "soon", "NaN"] {
            let err = run(&SleepCommand, &ctx, &[bad]).await.unwrap_err();
            assert!(err.is(ValidationReason::InvalidArgs), "{bad}");
        }
    }
}
