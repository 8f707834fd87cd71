//! Process-wide table of live sessions by id.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{SessionConfig, SessionHandle};
use crate::runner::CommandRunner;
use crate::error::{Error, Result, SessionReason};
use crate::registry::CommandRegistry;
use crate::vfs::MountTable;

/// Concurrent map from session id to handle.
///
/// All sessions share one mount table and one command registry.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    mounts: Arc<MountTable>,
    commands: Arc<CommandRegistry>,
}

impl SessionRegistry {
    /// Registry starting sessions over `mounts` with `commands`.
    pub fn new(mounts: Arc<MountTable>, commands: Arc<CommandRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            mounts,
            commands,
        }
    }

    /// The shared mount table.
    pub fn mounts(&self) -> &Arc<MountTable> {
        &self.mounts
    }

    /// Start and register a session.
    ///
    /// Fails with `session: invalid_session_id` if the id is empty or
    /// already live, and with a `vfs` error if the initial cwd is not a
    /// directory.
    pub async fn start(&self, config: SessionConfig) -> Result<SessionHandle> {
        let (state, vfs) = config.prepare(&self.mounts).await?;
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, handle| handle.is_alive());
        if sessions.contains_key(&config.id) {
            return Err(Error::session(
                SessionReason::InvalidSessionId,
                format!("session {} already exists", config.id),
            )
            .with_context("session_id", &config.id));
        }
        let id = config.id.clone();
        let handle = SessionHandle::spawn(state, CommandRunner::new(Arc::clone(&self.commands), vfs));
        sessions.insert(id, handle.clone());
        Ok(handle)
    }

    /// Look up a live session.
    pub fn get(&self, id: &str) -> Result<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .filter(|handle| handle.is_alive())
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Stop and unregister a session.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let handle = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| not_found(id))?;
        handle.stop().await
    }

    /// Ids of live sessions, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, handle)| handle.is_alive())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

fn not_found(id: &str) -> Error {
    Error::session(SessionReason::NotFound, format!("no session {id}")).with_context("session_id", id)
}
