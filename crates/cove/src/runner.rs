//! Command runner: parse a line and execute its chain.
//!
//! Each command of the chain is resolved through the [`CommandRegistry`],
//! its arguments validated against its schema, and then run against the
//! session's VFS view. State updates apply immediately, so `cd /a; ls` lists
//! `/a`. The whole chain runs under the execution's [`ResourceLimits`]:
//!
//! - the runtime limit bounds the chain's wall-clock time
//! - the output limit bounds the bytes emitted by every command together
//!
//! Crossing either aborts the chain with the matching `command` error and
//! discards its state updates.
//!
//! [`ResourceLimits`]: crate::limits::ResourceLimits

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{CommandReason, Error, Result};
use crate::limits::OutputBudget;
use crate::parser::{Chain, ChainOp, parse};
use crate::policy::SandboxPolicy;
use crate::registry::{CommandContext, CommandRegistry, Emitter, OutputSink};
use crate::state::{ShellState, StateUpdate};
use crate::vfs::VfsRouter;

/// Result of running a whole line.
#[derive(Debug)]
pub struct Execution {
    /// Net state change of the commands that ran.
    pub update: Option<StateUpdate>,
    /// Result of the last executed command.
    pub result: Result<()>,
}

impl Execution {
    fn failed(error: Error) -> Self {
        Self {
            update: None,
            result: Err(error),
        }
    }

    /// Collapse to `Ok(update)` or the failure.
    pub fn into_result(self) -> Result<Option<StateUpdate>> {
        self.result.map(|()| self.update)
    }
}

/// Message from a running task to its session.
#[derive(Debug)]
pub(crate) struct RunnerMessage {
    pub(crate) command_id: u64,
    pub(crate) event: RunnerEvent,
}

#[derive(Debug)]
pub(crate) enum RunnerEvent {
    Output(String),
    Finished(Execution),
    Crashed(String),
}

/// Executes command lines for one workspace.
#[derive(Clone, Debug)]
pub struct CommandRunner {
    registry: Arc<CommandRegistry>,
    vfs: VfsRouter,
}

impl CommandRunner {
    /// Runner dispatching through `registry` against `vfs`.
    pub fn new(registry: Arc<CommandRegistry>, vfs: VfsRouter) -> Self {
        Self { registry, vfs }
    }

    /// The VFS view commands run against.
    pub fn vfs(&self) -> &VfsRouter {
        &self.vfs
    }

    /// Execute `line` and return the resulting state update.
    ///
    /// Output goes to `sink`.
    pub async fn execute(
        &self,
        state: ShellState,
        line: &str,
        policy: SandboxPolicy,
        sink: OutputSink,
    ) -> Result<Option<StateUpdate>> {
        self.execute_with_cancel(state, line, policy, sink, CancellationToken::new())
            .await
            .into_result()
    }

    /// Execute `line`, stopping early when `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        state: ShellState,
        line: &str,
        policy: SandboxPolicy,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Execution {
        let chain = match parse(line) {
            Ok(chain) => chain,
            Err(e) => return Execution::failed(e),
        };

        let policy = Arc::new(policy);
        let budget = Arc::new(OutputBudget::new(policy.limits.max_output_bytes));
        let out = Emitter::new(Arc::clone(&budget), sink);
        let max_runtime = policy.limits.max_runtime;

        let work = self.run_chain(state, &chain, policy, out, &budget);
        let bounded = async {
            match max_runtime {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(execution) => execution,
                    Err(_) => Execution::failed(
                        Error::command(
                            CommandReason::RuntimeLimitExceeded,
                            format!("runtime exceeded {} ms", limit.as_millis()),
                        )
                        .with_context("max_runtime_ms", limit.as_millis()),
                    ),
                },
                None => work.await,
            }
        };

        let execution = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Execution::failed(Error::command(CommandReason::Cancelled, "command cancelled"))
            }
            _ = budget.exceeded() => Execution::failed(budget.limit_error()),
            execution = bounded => execution,
        };

        if budget.is_exceeded() {
            return Execution::failed(budget.limit_error());
        }
        execution
    }

    async fn run_chain(
        &self,
        initial: ShellState,
        chain: &Chain,
        policy: Arc<SandboxPolicy>,
        out: Emitter,
        budget: &OutputBudget,
    ) -> Execution {
        let mut state = initial.clone();
        let mut last: Result<()> = Ok(());

        for cmd in chain {
            if budget.is_exceeded() {
                return Execution::failed(budget.limit_error());
            }
            if cmd.op == Some(ChainOp::And) && last.is_err() {
                tracing::debug!(
                    session_id = %state.session_id,
                    skipped = %cmd.name,
                    "previous command failed, skipping rest of chain"
                );
                break;
            }
            if let Err(e) = &last {
                tracing::debug!(session_id = %state.session_id, error = %e, "command failed, continuing");
            }

            tracing::debug!(session_id = %state.session_id, command = %cmd.name, "running command");
            let ctx = CommandContext {
                state: state.clone(),
                vfs: self.vfs.clone(),
                policy: Arc::clone(&policy),
                out: out.clone(),
            };
            last = self.run_one(&ctx, &cmd.name, &cmd.args).await.map(|update| {
                if let Some(update) = update {
                    state.apply(update);
                }
            });
        }

        Execution {
            update: StateUpdate::diff(&initial, &state),
            result: last,
        }
    }

    async fn run_one(
        &self,
        ctx: &CommandContext,
        name: &str,
        raw: &[String],
    ) -> Result<Option<StateUpdate>> {
        let command = self.registry.resolve(name)?;
        let args = command.schema().validate(name, raw)?;
        command.run(ctx, args).await
    }

    /// Streaming execution on behalf of a session.
    ///
    /// Output and the final outcome are sent to `tx` tagged with
    /// `command_id`. A panic anywhere in the chain is reported as
    /// [`RunnerEvent::Crashed`].
    pub(crate) fn run(
        self,
        command_id: u64,
        state: ShellState,
        line: String,
        policy: SandboxPolicy,
        cancel: CancellationToken,
        tx: mpsc::UnboundedSender<RunnerMessage>,
    ) -> impl Future<Output = ()> + Send + 'static {
        // created before the first poll so an early abort is still reported
        let guard = CompletionGuard {
            command_id,
            tx: tx.clone(),
            done: false,
        };
        let sink: OutputSink = Arc::new(move |chunk: String| {
            // the session may already have dropped this command
            let _ = tx.send(RunnerMessage {
                command_id,
                event: RunnerEvent::Output(chunk),
            });
        });

        async move {
            let outcome =
                AssertUnwindSafe(self.execute_with_cancel(state, &line, policy, sink, cancel))
                    .catch_unwind()
                    .await;
            let event = match outcome {
                Ok(execution) => RunnerEvent::Finished(execution),
                Err(panic) => RunnerEvent::Crashed(panic_message(panic.as_ref())),
            };
            guard.finish(event);
        }
    }
}

/// Reports the outcome of one command task exactly once.
///
/// Dropped without [`finish`](Self::finish) (the task was aborted or torn
/// down mid-flight), it reports [`RunnerEvent::Crashed`].
struct CompletionGuard {
    command_id: u64,
    tx: mpsc::UnboundedSender<RunnerMessage>,
    done: bool,
}

impl CompletionGuard {
    fn finish(mut self, event: RunnerEvent) {
        self.done = true;
        self.send(event);
    }

    fn send(&self, event: RunnerEvent) {
        let command_id = self.command_id;
        if self.tx.send(RunnerMessage { command_id, event }).is_err() {
            tracing::debug!(command_id, "session gone before command finished");
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.done {
            self.send(RunnerEvent::Crashed(
                "command task ended without reporting a result".to_string(),
            ));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "command panicked".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::{ShellReason, ValidationReason, VfsReason};
    use crate::limits::ResourceLimits;
    use crate::registry::{ArgSchema, Args, Command};
    use crate::vfs::MountTable;

    struct Spam;

    #[async_trait]
    impl Command for Spam {
        fn name(&self) -> &str {
            "spam"
        }
        fn summary(&self) -> &str {
            "emit forever, ignoring errors"
        }
        fn schema(&self) -> ArgSchema {
            ArgSchema::new("spam")
        }
        async fn run(&self, ctx: &CommandContext, _args: Args) -> Result<Option<StateUpdate>> {
            loop {
                let _ = ctx.out.emit("spam\n");
                tokio::task::yield_now().await;
            }
        }
    }

    async fn runner() -> CommandRunner {
        let table = Arc::new(MountTable::new());
        table
            .mount("ws", "/", "memory", serde_json::Value::Null)
            .await
            .unwrap();
        let mut registry = CommandRegistry::with_builtins();
        registry.register(Spam);
        CommandRunner::new(Arc::new(registry), table.router("ws"))
    }

    fn capture() -> (OutputSink, Arc<Mutex<String>>) {
        let out = Arc::new(Mutex::new(String::new()));
        let sink = {
            let out = out.clone();
            Arc::new(move |chunk: String| out.lock().unwrap().push_str(&chunk))
        };
        (sink, out)
    }

    fn state() -> ShellState {
        ShellState::new("s1", "ws")
    }

    #[tokio::test]
    async fn test_parse_error_returned_directly() {
        let (sink, _) = capture();
        let err = runner()
            .await
            .execute(state(), "echo 'open", SandboxPolicy::new(), sink)
            .await
            .unwrap_err();
        assert!(err.is(ShellReason::UnclosedQuote));
    }

    #[tokio::test]
    async fn test_and_short_circuits() {
        let (sink, out) = capture();
        let err = runner()
            .await
            .execute(state(), "unknown_cmd && echo X", SandboxPolicy::new(), sink)
            .await
            .unwrap_err();
        assert!(err.is(ShellReason::UnknownCommand));
        assert_eq!(*out.lock().unwrap(), "");
    }

    #[tokio::test]
    async fn test_semicolon_continues() {
        let (sink, out) = capture();
        let update = runner()
            .await
            .execute(state(), "unknown_cmd; echo X", SandboxPolicy::new(), sink)
            .await
            .unwrap();
        assert_eq!(update, None);
        assert_eq!(*out.lock().unwrap(), "X\n");
    }

    #[tokio::test]
    async fn test_last_command_decides_result() {
        let (sink, _) = capture();
        let err = runner()
            .await
            .execute(state(), "echo a; cat /missing", SandboxPolicy::new(), sink)
            .await
            .unwrap_err();
        assert!(err.is(VfsReason::NotFound));
    }

    #[tokio::test]
    async fn test_invalid_args() {
        let (sink, _) = capture();
        let err = runner()
            .await
            .execute(state(), "cp onlyone", SandboxPolicy::new(), sink)
            .await
            .unwrap_err();
        assert!(err.is(ValidationReason::InvalidArgs));
    }

    #[tokio::test]
    async fn test_state_updates_apply_within_chain() {
        let (sink, out) = capture();
        let runner = runner().await;
        let update = runner
            .execute(
                state(),
                "mkdir /a; cd /a && write f.txt hi && pwd; export X=1",
                SandboxPolicy::new(),
                sink,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.cwd.as_deref(), Some("/a"));
        assert_eq!(update.env.unwrap().get("X").map(String::as_str), Some("1"));
        assert_eq!(*out.lock().unwrap(), "/a\n");
        assert_eq!(runner.vfs().read("/a/f.txt").await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_failed_chain_keeps_earlier_updates() {
        let (sink, _) = capture();
        let runner = runner().await;
        runner.vfs().mkdir("/a").await.unwrap();
        let execution = runner
            .execute_with_cancel(
                state(),
                "cd /a; cat nope",
                SandboxPolicy::new(),
                sink,
                CancellationToken::new(),
            )
            .await;
        assert!(execution.result.is_err());
        assert_eq!(execution.update, Some(StateUpdate::cwd("/a")));
    }

    #[tokio::test]
    async fn test_runtime_limit() {
        let (sink, _) = capture();
        let policy = SandboxPolicy::new().with_limits(
            ResourceLimits::unlimited().with_max_runtime(Duration::from_millis(50)),
        );
        let err = runner()
            .await
            .execute(state(), "sleep 30", policy, sink)
            .await
            .unwrap_err();
        assert!(err.is(CommandReason::RuntimeLimitExceeded));
    }

    #[tokio::test]
    async fn test_output_limit_aborts_runaway_command() {
        let (sink, out) = capture();
        let policy = SandboxPolicy::new()
            .with_limits(ResourceLimits::unlimited().with_max_output_bytes(20));
        let err = runner()
            .await
            .execute(state(), "spam", policy, sink)
            .await
            .unwrap_err();
        assert!(err.is(CommandReason::OutputLimitExceeded));
        assert!(out.lock().unwrap().len() <= 20);
    }

    #[tokio::test]
    async fn test_output_limit_overrides_later_success() {
        let (sink, _) = capture();
        let policy = SandboxPolicy::new()
            .with_limits(ResourceLimits::unlimited().with_max_output_bytes(4));
        let err = runner()
            .await
            .execute(state(), "echo toolong; cd /; echo ok", policy, sink)
            .await
            .unwrap_err();
        assert!(err.is(CommandReason::OutputLimitExceeded));
    }

    #[tokio::test]
    async fn test_cancel() {
        let (sink, _) = capture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let execution = runner()
            .await
            .execute_with_cancel(state(), "sleep 30", SandboxPolicy::new(), sink, cancel)
            .await;
        assert!(execution.result.unwrap_err().is(CommandReason::Cancelled));
    }

    #[tokio::test]
    async fn test_aborted_task_reports_crash() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(runner().await.run(
            7,
            state(),
            "sleep 30".to_string(),
            SandboxPolicy::new(),
            CancellationToken::new(),
            tx,
        ));
        task.abort();
        let _ = task.await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.command_id, 7);
        assert!(matches!(msg.event, RunnerEvent::Crashed(_)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_finished_task_reports_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        runner()
            .await
            .run(
                1,
                state(),
                "echo hi".to_string(),
                SandboxPolicy::new(),
                CancellationToken::new(),
                tx,
            )
            .await;

        assert!(matches!(rx.recv().await.unwrap().event, RunnerEvent::Output(_)));
        assert!(matches!(rx.recv().await.unwrap().event, RunnerEvent::Finished(_)));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "command panicked");
    }
}
