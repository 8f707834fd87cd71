//! Events broadcast by a session to its subscribers.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An event in a session's ordered event stream.
///
/// For a single command, `CommandStarted` always comes first and exactly one
/// terminal event (`CommandDone`, `Error`, `CommandCancelled` or
/// `CommandCrashed`) comes last.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A run request was accepted.
    CommandStarted {
        /// The raw input line.
        line: String,
    },
    /// A chunk of command output.
    Output {
        /// Output text.
        chunk: String,
    },
    /// A failure: either a rejected request or a failed command.
    Error {
        /// The structured error.
        error: Error,
    },
    /// The working directory changed as a result of the command.
    CwdChanged {
        /// New absolute working directory.
        path: String,
    },
    /// The command finished successfully.
    CommandDone,
    /// The command was cancelled.
    CommandCancelled,
    /// The command terminated abnormally.
    CommandCrashed {
        /// Description of the failure.
        reason: String,
    },
}

impl SessionEvent {
    /// Returns true for events that end a command.
    ///
    /// An `Error` event is terminal only when it follows a `CommandStarted`;
    /// a rejected run (e.g. `busy`) also produces one without any start.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::CommandDone
                | SessionEvent::Error { .. }
                | SessionEvent::CommandCancelled
                | SessionEvent::CommandCrashed { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ShellReason;

    #[test]
    fn test_event_wire_format() {
        let event = SessionEvent::Output {
            chunk: "hi\n".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"type": "output", "chunk": "hi\n"}));

        let done = serde_json::to_value(SessionEvent::CommandDone).unwrap();
        assert_eq!(done, serde_json::json!({"type": "command_done"}));
    }

    #[test]
    fn test_error_event_roundtrip() {
        let event = SessionEvent::Error {
            error: Error::shell(ShellReason::Busy, "busy"),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_terminal_events() {
        assert!(SessionEvent::CommandDone.is_terminal());
        assert!(SessionEvent::CommandCancelled.is_terminal());
        assert!(!SessionEvent::CwdChanged { path: "/".into() }.is_terminal());
        assert!(
            !SessionEvent::CommandStarted {
                line: "ls".into()
            }
            .is_terminal()
        );
    }
}
