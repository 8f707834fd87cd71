//! Sessions: serial actors owning shell state.
//!
//! A session accepts requests through a [`SessionHandle`] and processes them
//! one at a time. At most one command is in flight; it runs as its own task
//! and streams events back to the actor, which rebroadcasts them to every
//! subscriber in the order it processed them.
//!
//! ```text
//!   handle ──Request──▶ actor ──spawn──▶ runner task
//!                         ▲                   │
//!                         └───RunnerMessage───┘
//!                         │
//!                         └──SessionEvent──▶ subscribers
//! ```

mod actor;
mod registry;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::error::{CommandReason, Error, Result, SessionReason, ShellReason, VfsReason};
use crate::event::SessionEvent;
use crate::policy::SandboxPolicy;
use crate::registry::CommandRegistry;
use crate::runner::CommandRunner;
use crate::state::ShellState;
use crate::vfs::{MountTable, VfsRouter, path};

pub use registry::SessionRegistry;

use actor::{Request, SessionActor};

const INBOX_CAPACITY: usize = 64;

/// Parameters for starting a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Session id; must be non-empty.
    pub id: String,
    /// Workspace id; must be non-empty.
    pub workspace: String,
    /// Initial working directory.
    pub cwd: String,
    /// Initial environment.
    pub env: BTreeMap<String, String>,
}

impl SessionConfig {
    /// Config for session `id` in `workspace`, starting at `/`.
    pub fn new(id: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workspace: workspace.into(),
            cwd: "/".to_string(),
            env: BTreeMap::new(),
        }
    }

    /// Set the initial working directory.
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn validate(&self) -> Result<ShellState> {
        if self.id.trim().is_empty() {
            return Err(Error::session(
                SessionReason::InvalidSessionId,
                "session id must be a non-empty string",
            ));
        }
        if self.workspace.trim().is_empty() {
            return Err(Error::session(
                SessionReason::InvalidWorkspaceId,
                "workspace id must be a non-empty string",
            )
            .with_context("session_id", &self.id));
        }
        let mut state = ShellState::new(&self.id, &self.workspace);
        state.cwd = path::normalize(&self.cwd)?;
        state.env = self.env.clone();
        Ok(state)
    }

    /// Validate the config and check the initial cwd is a directory in the
    /// workspace.
    async fn prepare(&self, mounts: &Arc<MountTable>) -> Result<(ShellState, VfsRouter)> {
        let state = self.validate()?;
        let vfs = mounts.router(state.workspace.clone());
        let meta = vfs
            .stat(&state.cwd)
            .await
            .map_err(|e| e.with_context("session_id", &self.id))?;
        if !meta.is_dir() {
            return Err(Error::vfs(
                VfsReason::NotDirectory,
                format!("working directory {} is not a directory", state.cwd),
            )
            .with_context("path", &state.cwd)
            .with_context("session_id", &self.id));
        }
        Ok((state, vfs))
    }
}

/// Immutable view of a session's state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Session id.
    pub id: String,
    /// Workspace id.
    pub workspace: String,
    /// Working directory.
    pub cwd: String,
    /// Environment.
    pub env: BTreeMap<String, String>,
    /// Accepted lines, oldest first.
    pub history: Vec<String>,
    /// Whether a command is in flight.
    pub busy: bool,
    /// The in-flight line, if any.
    pub running: Option<String>,
    /// Number of live subscribers.
    pub subscribers: usize,
}

/// A subscription to a session's event stream.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    /// Subscriber id, for [`SessionHandle::unsubscribe`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once unsubscribed or the session stopped.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }
}

/// Cloneable handle to a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: Arc<str>,
    tx: mpsc::Sender<Request>,
}

impl SessionHandle {
    /// Start a session actor.
    ///
    /// Commands resolve through `commands` and see the mounts of the
    /// session's workspace in `mounts`. The initial cwd must already exist
    /// as a directory there.
    pub async fn start(
        config: SessionConfig,
        mounts: Arc<MountTable>,
        commands: Arc<CommandRegistry>,
    ) -> Result<Self> {
        let (state, vfs) = config.prepare(&mounts).await?;
        Ok(Self::spawn(state, CommandRunner::new(commands, vfs)))
    }

    fn spawn(state: ShellState, runner: CommandRunner) -> Self {
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let id: Arc<str> = Arc::from(state.session_id.as_str());
        SessionActor::spawn(state, runner, inbox);
        Self { id, tx }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the actor is still running.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    fn gone(&self) -> Error {
        Error::session(SessionReason::NotFound, format!("session {} is not running", self.id))
            .with_context("session_id", &*self.id)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    /// Start running `line`; returns the command id once accepted.
    ///
    /// Fails with `shell: busy` (also broadcast as an `error` event) if a
    /// command is already in flight.
    pub async fn run(&self, line: impl Into<String>, policy: SandboxPolicy) -> Result<u64> {
        let line = line.into();
        self.request(|reply| Request::Run {
            line,
            policy,
            reply,
        })
        .await?
    }

    /// Cancel the in-flight command.
    ///
    /// Fails with `session: invalid_state_transition` when idle.
    pub async fn cancel(&self) -> Result<()> {
        self.request(|reply| Request::Cancel { reply }).await?
    }

    /// Subscribe to the event stream.
    pub async fn subscribe(&self) -> Result<Subscription> {
        let (tx, events) = mpsc::unbounded_channel();
        let id = self.request(|reply| Request::Subscribe { tx, reply }).await?;
        Ok(Subscription { id, events })
    }

    /// Remove a subscriber; returns false if it was not subscribed.
    pub async fn unsubscribe(&self, id: u64) -> Result<bool> {
        self.request(|reply| Request::Unsubscribe { id, reply }).await
    }

    /// Snapshot of the session state. Never waits for a running command.
    pub async fn state(&self) -> Result<SessionSnapshot> {
        self.request(|reply| Request::GetState { reply }).await
    }

    /// Stop the session, aborting any in-flight command.
    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| Request::Stop { reply }).await
    }

    /// Run `line` and wait for it to finish, collecting its output.
    pub async fn run_and_wait(
        &self,
        line: impl Into<String>,
        policy: SandboxPolicy,
    ) -> Result<String> {
        let mut events = self.subscribe().await?;
        let result = match self.run(line, policy).await {
            Ok(_) => collect_output(&mut events).await,
            Err(e) => Err(e),
        };
        // the session may have stopped meanwhile
        let _ = self.unsubscribe(events.id()).await;
        result.map_err(|e| e.with_context("session_id", &*self.id))
    }
}

/// Read events up to the terminal event of the next started command.
async fn collect_output(events: &mut Subscription) -> Result<String> {
    let mut started = false;
    let mut output = String::new();
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::CommandStarted { .. } => started = true,
            _ if !started => {}
            SessionEvent::Output { chunk } => output.push_str(&chunk),
            SessionEvent::CwdChanged { .. } => {}
            SessionEvent::CommandDone => return Ok(output),
            // another caller's rejected run
            SessionEvent::Error { error } if error.is(ShellReason::Busy) => {}
            SessionEvent::Error { error } => return Err(error),
            SessionEvent::CommandCancelled => {
                return Err(Error::command(CommandReason::Cancelled, "command cancelled"));
            }
            SessionEvent::CommandCrashed { reason } => {
                return Err(Error::command(CommandReason::Crashed, reason));
            }
        }
    }
    Err(Error::session(SessionReason::NotFound, "session stopped before the command finished"))
}
