//! Structured errors shared by every layer of the engine.
//!
//! Every expected failure is an [`Error`] value carrying a stable
//! `(category, reason)` pair, a human-readable message and a free-form
//! context map. Callers match on [`Error::reason`] (or on the string forms
//! returned by [`Error::category`] and [`Error::code`]) rather than on the
//! message text.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Virtual filesystem and mount failures.
    Vfs,
    /// Parsing, dispatch and sandbox failures.
    Shell,
    /// Argument validation failures.
    Validation,
    /// Session lifecycle failures.
    Session,
    /// Command execution failures (limits, cancellation, crashes).
    Command,
}

impl Category {
    /// Stable string form of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vfs => "vfs",
            Category::Shell => "shell",
            Category::Validation => "validation",
            Category::Session => "session",
            Category::Command => "command",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! reason_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $code:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Stable snake_case code for this reason.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            fn from_code(code: &str) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

reason_enum! {
    /// Reasons in the `vfs` category.
    VfsReason {
        /// Path does not exist.
        NotFound => "not_found",
        /// A path component is not a directory.
        NotDirectory => "not_directory",
        /// Path is a directory where a file was expected.
        IsDirectory => "is_directory",
        /// Path or mount already exists.
        AlreadyExists => "already_exists",
        /// Directory still has entries.
        DirectoryNotEmpty => "directory_not_empty",
        /// Path escapes its root or is malformed.
        PathTraversal => "path_traversal",
        /// Operation not supported by the adapter.
        Unsupported => "unsupported",
        /// No mount covers the path.
        NoMount => "no_mount",
        /// Adapter could not be configured.
        MountFailed => "mount_failed",
        /// Any other adapter failure.
        Unknown => "unknown",
    }
}

reason_enum! {
    /// Reasons in the `shell` category.
    ShellReason {
        /// Command name is not registered.
        UnknownCommand => "unknown_command",
        /// Input line is empty or whitespace.
        EmptyCommand => "empty_command",
        /// Malformed chain or token.
        SyntaxError => "syntax_error",
        /// A quote was opened but never closed.
        UnclosedQuote => "unclosed_quote",
        /// The session already has a command in flight.
        Busy => "busy",
        /// Network intent rejected by the sandbox policy.
        NetworkBlocked => "network_blocked",
    }
}

reason_enum! {
    /// Reasons in the `validation` category.
    ValidationReason {
        /// Arguments do not match the command's schema.
        InvalidArgs => "invalid_args",
    }
}

reason_enum! {
    /// Reasons in the `session` category.
    SessionReason {
        /// No live session with that id.
        NotFound => "not_found",
        /// Session id is empty or already taken.
        InvalidSessionId => "invalid_session_id",
        /// Workspace id is empty.
        InvalidWorkspaceId => "invalid_workspace_id",
        /// Request is not valid in the current state.
        InvalidStateTransition => "invalid_state_transition",
    }
}

reason_enum! {
    /// Reasons in the `command` category.
    CommandReason {
        /// Command timed out.
        Timeout => "timeout",
        /// Command was cancelled.
        Cancelled => "cancelled",
        /// Command terminated abnormally.
        Crashed => "crashed",
        /// Wall-clock limit exceeded.
        RuntimeLimitExceeded => "runtime_limit_exceeded",
        /// Output byte limit exceeded.
        OutputLimitExceeded => "output_limit_exceeded",
        /// Command could not be started.
        StartFailed => "start_failed",
    }
}

/// Category-qualified failure reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reason {
    /// `vfs` failure.
    Vfs(VfsReason),
    /// `shell` failure.
    Shell(ShellReason),
    /// `validation` failure.
    Validation(ValidationReason),
    /// `session` failure.
    Session(SessionReason),
    /// `command` failure.
    Command(CommandReason),
}

impl Reason {
    /// Category this reason belongs to.
    pub fn category(&self) -> Category {
        match self {
            Reason::Vfs(_) => Category::Vfs,
            Reason::Shell(_) => Category::Shell,
            Reason::Validation(_) => Category::Validation,
            Reason::Session(_) => Category::Session,
            Reason::Command(_) => Category::Command,
        }
    }

    /// Stable snake_case code, unique within the category.
    pub fn code(&self) -> &'static str {
        match self {
            Reason::Vfs(r) => r.as_str(),
            Reason::Shell(r) => r.as_str(),
            Reason::Validation(r) => r.as_str(),
            Reason::Session(r) => r.as_str(),
            Reason::Command(r) => r.as_str(),
        }
    }

    /// Rebuild a reason from its string pair.
    pub fn from_parts(category: Category, code: &str) -> Option<Self> {
        match category {
            Category::Vfs => VfsReason::from_code(code).map(Reason::Vfs),
            Category::Shell => ShellReason::from_code(code).map(Reason::Shell),
            Category::Validation => ValidationReason::from_code(code).map(Reason::Validation),
            Category::Session => SessionReason::from_code(code).map(Reason::Session),
            Category::Command => CommandReason::from_code(code).map(Reason::Command),
        }
    }
}

impl From<VfsReason> for Reason {
    fn from(r: VfsReason) -> Self {
        Reason::Vfs(r)
    }
}

impl From<ShellReason> for Reason {
    fn from(r: ShellReason) -> Self {
        Reason::Shell(r)
    }
}

impl From<ValidationReason> for Reason {
    fn from(r: ValidationReason) -> Self {
        Reason::Validation(r)
    }
}

impl From<SessionReason> for Reason {
    fn from(r: SessionReason) -> Self {
        Reason::Session(r)
    }
}

impl From<CommandReason> for Reason {
    fn from(r: CommandReason) -> Self {
        Reason::Command(r)
    }
}

/// A structured, pattern-matchable failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{}:{}: {message}", .reason.category(), .reason.code())]
pub struct Error {
    reason: Reason,
    message: String,
    context: BTreeMap<String, String>,
}

impl Error {
    /// Create an error with the given reason and message.
    pub fn new(reason: impl Into<Reason>, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for a `vfs` error.
    pub fn vfs(reason: VfsReason, message: impl Into<String>) -> Self {
        Self::new(reason, message)
    }

    /// Shorthand for a `shell` error.
    pub fn shell(reason: ShellReason, message: impl Into<String>) -> Self {
        Self::new(reason, message)
    }

    /// Shorthand for `validation: invalid_args`.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ValidationReason::InvalidArgs, message)
    }

    /// Shorthand for a `session` error.
    pub fn session(reason: SessionReason, message: impl Into<String>) -> Self {
        Self::new(reason, message)
    }

    /// Shorthand for a `command` error.
    pub fn command(reason: CommandReason, message: impl Into<String>) -> Self {
        Self::new(reason, message)
    }

    /// Attach a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// The category-qualified reason.
    pub fn reason(&self) -> Reason {
        self.reason
    }

    /// The error category.
    pub fn category(&self) -> Category {
        self.reason.category()
    }

    /// The reason code within the category.
    pub fn code(&self) -> &'static str {
        self.reason.code()
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Free-form context entries.
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Returns true if this error has the given reason.
    pub fn is(&self, reason: impl Into<Reason>) -> bool {
        self.reason == reason.into()
    }
}

/// Wire form used by `serde`.
#[derive(Serialize, Deserialize)]
struct ErrorRepr {
    category: Category,
    reason: String,
    message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    context: BTreeMap<String, String>,
}

impl Serialize for Error {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ErrorRepr {
            category: self.category(),
            reason: self.code().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Error {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = ErrorRepr::deserialize(deserializer)?;
        let reason = Reason::from_parts(repr.category, &repr.reason).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown reason {}:{}",
                repr.category, repr.reason
            ))
        })?;
        Ok(Self {
            reason,
            message: repr.message,
            context: repr.context,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_category_and_code() {
        let err = Error::vfs(VfsReason::NotFound, "missing /a");
        assert_eq!(err.category(), Category::Vfs);
        assert_eq!(err.code(), "not_found");
        assert!(err.is(VfsReason::NotFound));
        assert!(!err.is(SessionReason::NotFound));
    }

    #[test]
    fn test_display_includes_category_and_reason() {
        let err = Error::shell(ShellReason::Busy, "command in flight");
        assert_eq!(err.to_string(), "shell:busy: command in flight");
    }

    #[test]
    fn test_context() {
        let err = Error::invalid_args("too many")
            .with_context("command", "cd")
            .with_context("count", 3);
        assert_eq!(err.context().get("command").map(String::as_str), Some("cd"));
        assert_eq!(err.context().get("count").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_serde_shape() {
        let err = Error::command(CommandReason::OutputLimitExceeded, "too much output")
            .with_context("limit", 10);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["category"], "command");
        assert_eq!(json["reason"], "output_limit_exceeded");
        assert_eq!(json["context"]["limit"], "10");

        let back: Error = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_deserialize_rejects_unknown_reason() {
        let json = serde_json::json!({
            "category": "vfs",
            "reason": "busy",
            "message": "nope",
        });
        assert!(serde_json::from_value::<Error>(json).is_err());
    }
}
