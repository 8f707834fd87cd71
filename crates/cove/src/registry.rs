//! Command contract and the name-keyed command registry.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result, ShellReason};
use crate::limits::OutputBudget;
use crate::policy::{Intent, SandboxPolicy, authorize};
use crate::state::{ShellState, StateUpdate};
use crate::vfs::{VfsRouter, path};

/// Argument schema a command declares.
///
/// Unless `passthrough` is set, every argument starting with `-` (other
/// than `-` itself) is a cluster of short flags which must all be declared;
/// `--` ends flag parsing. With `passthrough`, leading declared flags are
/// still recognised but parsing stops at the first other argument, which is
/// kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArgSchema {
    /// Minimum number of positional arguments.
    pub min: usize,
    /// Maximum number of positional arguments (`None` = unbounded).
    pub max: Option<usize>,
    /// Accepted short flags.
    pub flags: Vec<char>,
    /// Keep unknown flag-like arguments as positionals.
    pub passthrough: bool,
    /// Usage line shown on validation errors.
    pub usage: String,
}

impl ArgSchema {
    /// Schema accepting no arguments.
    pub fn new(usage: impl Into<String>) -> Self {
        Self {
            min: 0,
            max: Some(0),
            flags: Vec::new(),
            passthrough: false,
            usage: usage.into(),
        }
    }

    /// Require at least `n` positionals, with no upper bound.
    pub fn at_least(mut self, n: usize) -> Self {
        self.min = n;
        self.max = None;
        self
    }

    /// Accept between `min` and `max` positionals.
    pub fn between(mut self, min: usize, max: usize) -> Self {
        self.min = min;
        self.max = Some(max);
        self
    }

    /// Require exactly `n` positionals.
    pub fn exactly(self, n: usize) -> Self {
        self.between(n, n)
    }

    /// Declare a short flag.
    pub fn flag(mut self, flag: char) -> Self {
        self.flags.push(flag);
        self
    }

    /// Keep unrecognised arguments verbatim.
    pub fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }

    /// Validate raw arguments for `command`.
    pub fn validate(&self, command: &str, raw: &[String]) -> Result<Args> {
        let invalid = |message: String| {
            Error::invalid_args(format!("{command}: {message}"))
                .with_context("command", command)
                .with_context("usage", &self.usage)
        };

        let mut args = Args::default();
        let mut flags_done = false;
        for arg in raw {
            if flags_done || arg == "-" || !arg.starts_with('-') {
                args.positional.push(arg.clone());
                if self.passthrough {
                    flags_done = true;
                }
                continue;
            }
            if arg == "--" {
                flags_done = true;
                continue;
            }
            let cluster: Vec<char> = arg[1..].chars().collect();
            match cluster.iter().find(|c| !self.flags.contains(c)) {
                None => args.flags.extend(cluster),
                Some(_) if self.passthrough => {
                    args.positional.push(arg.clone());
                    flags_done = true;
                }
                Some(c) => return Err(invalid(format!("unknown option -{c}"))),
            }
        }

        let n = args.positional.len();
        if n < self.min {
            return Err(invalid(format!("missing operand (usage: {})", self.usage)));
        }
        if let Some(max) = self.max
            && n > max
        {
            return Err(invalid(format!("too many arguments (usage: {})", self.usage)));
        }
        Ok(args)
    }
}

/// Validated arguments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Args {
    /// Positional arguments in order.
    pub positional: Vec<String>,
    /// Flags that were given.
    pub flags: BTreeSet<char>,
}

impl Args {
    /// Whether `flag` was given.
    pub fn flag(&self, flag: char) -> bool {
        self.flags.contains(&flag)
    }

    /// Positional argument `i`.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.positional.get(i).map(String::as_str)
    }

    /// Positional argument `i`, failing with `validation: invalid_args`.
    pub fn require(&self, i: usize) -> Result<&str> {
        self.get(i)
            .ok_or_else(|| Error::invalid_args(format!("missing argument {}", i + 1)))
    }

    /// Positional arguments from `i` on.
    pub fn rest(&self, i: usize) -> &[String] {
        self.positional.get(i..).unwrap_or_default()
    }
}

/// Destination for emitted output.
pub type OutputSink = Arc<dyn Fn(String) + Send + Sync>;

/// Per-call output callback.
///
/// Every chunk is counted against the execution's output budget before it
/// is forwarded; once the budget is exceeded `emit` fails with
/// `command: output_limit_exceeded` and nothing more is forwarded.
#[derive(Clone)]
pub struct Emitter {
    sink: OutputSink,
    budget: Arc<OutputBudget>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl Emitter {
    /// Forward chunks to `sink`, charging `budget`.
    pub fn new(budget: Arc<OutputBudget>, sink: OutputSink) -> Self {
        Self { sink, budget }
    }

    /// An emitter with no limit that drops everything.
    pub fn discard() -> Self {
        Self::new(Arc::new(OutputBudget::new(None)), Arc::new(|_: String| {}))
    }

    /// Emit a chunk of output.
    pub fn emit(&self, chunk: impl Into<String>) -> Result<()> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.budget.charge(chunk.len())?;
        (self.sink)(chunk);
        Ok(())
    }

    /// Emit `line` followed by a newline.
    pub fn line(&self, line: impl fmt::Display) -> Result<()> {
        self.emit(format!("{line}\n"))
    }
}

/// Everything a command sees while running.
#[derive(Clone, Debug)]
pub struct CommandContext {
    /// Shell state as of this command (earlier commands in the chain
    /// included).
    pub state: ShellState,
    /// The session's view of the VFS.
    pub vfs: VfsRouter,
    /// Sandbox policy of this execution.
    pub policy: Arc<SandboxPolicy>,
    /// Output callback.
    pub out: Emitter,
}

impl CommandContext {
    /// Resolve a user-supplied path against the working directory.
    pub fn resolve(&self, input: &str) -> Result<String> {
        path::join(&self.state.cwd, input)
    }

    /// Authorize a capability under the execution's policy.
    pub fn authorize(&self, intent: &Intent) -> Result<()> {
        authorize(intent, &self.policy)
    }
}

/// A command implementation.
#[async_trait]
pub trait Command: Send + Sync {
    /// Name the command is invoked by.
    fn name(&self) -> &str;

    /// One-line human summary.
    fn summary(&self) -> &str;

    /// Argument schema used to validate invocations.
    fn schema(&self) -> ArgSchema;

    /// Run with validated arguments.
    ///
    /// Returning a [`StateUpdate`] asks the session to change its state;
    /// later commands in the same chain observe it.
    async fn run(&self, ctx: &CommandContext, args: Args) -> Result<Option<StateUpdate>>;
}

/// Name-keyed table of command implementations.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn Command>>,
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.list())
            .finish()
    }
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in command set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register_builtins(&mut registry);
        registry
    }

    /// Register a command under its own name, replacing any previous one.
    pub fn register(&mut self, command: impl Command + 'static) {
        let name = command.name().to_string();
        self.register_as(name, Arc::new(command));
    }

    /// Register a command under an explicit name.
    pub fn register_as(&mut self, name: impl Into<String>, command: Arc<dyn Command>) {
        self.commands.insert(name.into(), command);
    }

    /// Look up a command.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    /// Look up a command, failing with `shell: unknown_command`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Command>> {
        self.lookup(name).ok_or_else(|| {
            Error::shell(
                ShellReason::UnknownCommand,
                format!("{name}: command not found"),
            )
            .with_context("command", name)
        })
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }
}
