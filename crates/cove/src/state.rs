//! Shell state visible to commands, and the updates they may request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of the per-session shell state handed to commands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellState {
    /// Owning session id.
    pub session_id: String,
    /// Workspace whose mounts the session sees.
    pub workspace: String,
    /// Absolute, normalized working directory.
    pub cwd: String,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Accepted input lines, oldest first.
    pub history: Vec<String>,
}

impl ShellState {
    /// Fresh state rooted at `/`.
    pub fn new(session_id: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            workspace: workspace.into(),
            cwd: "/".to_string(),
            env: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Apply an update, returning true if the working directory changed.
    pub fn apply(&mut self, update: StateUpdate) -> bool {
        let mut cwd_changed = false;
        if let Some(cwd) = update.cwd {
            cwd_changed = cwd != self.cwd;
            self.cwd = cwd;
        }
        if let Some(env) = update.env {
            self.env = env;
        }
        cwd_changed
    }
}

/// A state mutation requested by a command.
///
/// `env` replaces the whole environment map when present.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// New working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// New environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

impl StateUpdate {
    /// Change the working directory.
    pub fn cwd(path: impl Into<String>) -> Self {
        Self {
            cwd: Some(path.into()),
            env: None,
        }
    }

    /// Replace the environment.
    pub fn env(env: BTreeMap<String, String>) -> Self {
        Self {
            cwd: None,
            env: Some(env),
        }
    }

    /// The fields of `after` that differ from `before`, if any.
    pub fn diff(before: &ShellState, after: &ShellState) -> Option<Self> {
        let update = Self {
            cwd: (before.cwd != after.cwd).then(|| after.cwd.clone()),
            env: (before.env != after.env).then(|| after.env.clone()),
        };
        (!update.is_empty()).then_some(update)
    }

    /// True if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.cwd.is_none() && self.env.is_none()
    }
}
