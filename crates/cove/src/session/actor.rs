//! The per-session actor loop.

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::SessionSnapshot;
use crate::error::{Error, Result, SessionReason, ShellReason};
use crate::event::SessionEvent;
use crate::policy::SandboxPolicy;
use crate::runner::{CommandRunner, RunnerEvent, RunnerMessage};
use crate::state::ShellState;

/// Requests accepted by the actor, processed strictly in arrival order.
#[derive(Debug)]
pub(super) enum Request {
    Run {
        line: String,
        policy: SandboxPolicy,
        reply: oneshot::Sender<Result<u64>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        tx: mpsc::UnboundedSender<SessionEvent>,
        reply: oneshot::Sender<u64>,
    },
    Unsubscribe {
        id: u64,
        reply: oneshot::Sender<bool>,
    },
    GetState {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
struct InFlight {
    command_id: u64,
    line: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl InFlight {
    fn abort(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

pub(super) struct SessionActor {
    state: ShellState,
    runner: CommandRunner,
    subscribers: BTreeMap<u64, mpsc::UnboundedSender<SessionEvent>>,
    next_subscriber: u64,
    next_command: u64,
    in_flight: Option<InFlight>,
    runner_tx: mpsc::UnboundedSender<RunnerMessage>,
}

impl SessionActor {
    /// Spawn the actor; it runs until stopped or every handle is dropped.
    pub(super) fn spawn(
        state: ShellState,
        runner: CommandRunner,
        inbox: mpsc::Receiver<Request>,
    ) -> JoinHandle<()> {
        let (runner_tx, runner_rx) = mpsc::unbounded_channel();
        let actor = Self {
            state,
            runner,
            subscribers: BTreeMap::new(),
            next_subscriber: 0,
            next_command: 0,
            in_flight: None,
            runner_tx,
        };
        tokio::spawn(actor.run(inbox, runner_rx))
    }

    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Request>,
        mut runner_rx: mpsc::UnboundedReceiver<RunnerMessage>,
    ) {
        tracing::info!(
            session_id = %self.state.session_id,
            workspace = %self.state.workspace,
            "session started"
        );

        loop {
            tokio::select! {
                biased;

                request = inbox.recv() => {
                    let Some(request) = request else { break };
                    if self.handle(request).is_break() {
                        return;
                    }
                }

                Some(msg) = runner_rx.recv() => self.on_runner(msg),
            }
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            tracing::debug!(
                session_id = %self.state.session_id,
                command_id = in_flight.command_id,
                "aborting in-flight command on stop"
            );
            in_flight.abort();
        }
        self.subscribers.clear();
        tracing::info!(session_id = %self.state.session_id, "session stopped");
    }

    fn handle(&mut self, request: Request) -> ControlFlow<()> {
        match request {
            Request::Run {
                line,
                policy,
                reply,
            } => {
                let _ = reply.send(self.start(line, policy));
            }
            Request::Cancel { reply } => {
                let _ = reply.send(self.cancel());
            }
            Request::Subscribe { tx, reply } => {
                self.next_subscriber += 1;
                let id = self.next_subscriber;
                self.subscribers.insert(id, tx);
                let _ = reply.send(id);
            }
            Request::Unsubscribe { id, reply } => {
                let _ = reply.send(self.subscribers.remove(&id).is_some());
            }
            Request::GetState { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Request::Stop { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn start(&mut self, line: String, policy: SandboxPolicy) -> Result<u64> {
        if let Some(in_flight) = &self.in_flight {
            let err = Error::shell(ShellReason::Busy, "a command is already running")
                .with_context("session_id", &self.state.session_id)
                .with_context("running", &in_flight.line);
            tracing::debug!(session_id = %self.state.session_id, line = %line, "rejecting run while busy");
            self.broadcast(SessionEvent::Error { error: err.clone() });
            return Err(err);
        }

        self.next_command += 1;
        let command_id = self.next_command;
        self.state.history.push(line.clone());
        tracing::debug!(session_id = %self.state.session_id, command_id, line = %line, "command started");
        self.broadcast(SessionEvent::CommandStarted { line: line.clone() });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.runner.clone().run(
            command_id,
            self.state.clone(),
            line.clone(),
            policy,
            cancel.clone(),
            self.runner_tx.clone(),
        ));
        self.in_flight = Some(InFlight {
            command_id,
            line,
            cancel,
            task,
        });
        Ok(command_id)
    }

    fn cancel(&mut self) -> Result<()> {
        let Some(in_flight) = self.in_flight.take() else {
            return Err(Error::session(
                SessionReason::InvalidStateTransition,
                "no command is running",
            )
            .with_context("session_id", &self.state.session_id));
        };
        tracing::debug!(
            session_id = %self.state.session_id,
            command_id = in_flight.command_id,
            "command cancelled"
        );
        in_flight.abort();
        self.broadcast(SessionEvent::CommandCancelled);
        Ok(())
    }

    fn on_runner(&mut self, msg: RunnerMessage) {
        let current = self.in_flight.as_ref().map(|f| f.command_id);
        if current != Some(msg.command_id) {
            tracing::trace!(
                session_id = %self.state.session_id,
                command_id = msg.command_id,
                "dropping message from finished command"
            );
            return;
        }

        match msg.event {
            RunnerEvent::Output(chunk) => self.broadcast(SessionEvent::Output { chunk }),
            RunnerEvent::Finished(execution) => {
                self.in_flight = None;
                if let Some(update) = execution.update
                    && self.state.apply(update)
                {
                    let path = self.state.cwd.clone();
                    self.broadcast(SessionEvent::CwdChanged { path });
                }
                match execution.result {
                    Ok(()) => self.broadcast(SessionEvent::CommandDone),
                    Err(error) => {
                        tracing::debug!(
                            session_id = %self.state.session_id,
                            command_id = msg.command_id,
                            error = %error,
                            "command failed"
                        );
                        self.broadcast(SessionEvent::Error { error });
                    }
                }
            }
            RunnerEvent::Crashed(reason) => {
                self.in_flight = None;
                tracing::warn!(
                    session_id = %self.state.session_id,
                    command_id = msg.command_id,
                    reason = %reason,
                    "command crashed"
                );
                self.broadcast(SessionEvent::CommandCrashed { reason });
            }
        }
    }

    /// Deliver to every subscriber, pruning closed ones.
    fn broadcast(&mut self, event: SessionEvent) {
        let session_id = &self.state.session_id;
        self.subscribers.retain(|id, tx| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                tracing::debug!(session_id = %session_id, subscriber = id, "pruning closed subscriber");
            }
            alive
        });
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.state.session_id.clone(),
            workspace: self.state.workspace.clone(),
            cwd: self.state.cwd.clone(),
            env: self.state.env.clone(),
            history: self.state.history.clone(),
            busy: self.in_flight.is_some(),
            running: self.in_flight.as_ref().map(|f| f.line.clone()),
            subscribers: self.subscribers.len(),
        }
    }
}
