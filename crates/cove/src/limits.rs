//! Resource limits for command execution

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{CommandReason, Error, Result};

/// Resource limits applied around a whole command line.
///
/// `None` means unlimited; this is the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall-clock bound for the whole chain
    #[serde(
        rename = "max_runtime_ms",
        default,
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_runtime: Option<Duration>,
    /// Maximum output in bytes, summed over every command in the chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_bytes: Option<u64>,
}

impl ResourceLimits {
    /// No limits.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Set the runtime limit.
    pub fn with_max_runtime(mut self, limit: Duration) -> Self {
        self.max_runtime = Some(limit);
        self
    }

    /// Set the output limit.
    pub fn with_max_output_bytes(mut self, limit: u64) -> Self {
        self.max_output_bytes = Some(limit);
        self
    }

    /// Read limits from the `limits` object of an execution context.
    ///
    /// Values may be numbers or numeric strings. Anything missing,
    /// malformed, zero or negative is ignored.
    pub fn from_value(value: &Value) -> Self {
        Self {
            max_runtime: value
                .get("max_runtime_ms")
                .and_then(positive)
                .map(Duration::from_millis),
            max_output_bytes: value.get("max_output_bytes").and_then(positive),
        }
    }
}

/// Parse a positive integer from a number or numeric string.
///
/// Fractional values round up so that `0.5` still means "some limit".
pub(crate) fn positive(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    Some(n.ceil().min(u64::MAX as f64) as u64)
}

/// Helper for serializing an optional Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.filter(|ms| *ms > 0).map(Duration::from_millis))
    }
}

/// Output byte counter shared by every emitter of one execution.
///
/// Crossing the limit fires [`OutputBudget::exceeded`] so the runner can
/// abort work that ignores the emit error.
#[derive(Debug)]
pub struct OutputBudget {
    used: AtomicU64,
    limit: Option<u64>,
    exceeded: CancellationToken,
}

impl OutputBudget {
    /// Create a budget; `None` never trips.
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            used: AtomicU64::new(0),
            limit,
            exceeded: CancellationToken::new(),
        }
    }

    /// Account for `bytes` more output.
    ///
    /// Returns `command: output_limit_exceeded` if the total would go over
    /// the limit; the bytes are not counted in that case.
    pub fn charge(&self, bytes: usize) -> Result<()> {
        let bytes = bytes as u64;
        let Some(limit) = self.limit else {
            self.used.fetch_add(bytes, Ordering::Relaxed);
            return Ok(());
        };
        if self.exceeded.is_cancelled() {
            return Err(self.error(limit));
        }
        let before = self.used.fetch_add(bytes, Ordering::AcqRel);
        if before.saturating_add(bytes) > limit {
            self.used.fetch_sub(bytes, Ordering::AcqRel);
            self.exceeded.cancel();
            return Err(self.error(limit));
        }
        Ok(())
    }

    /// Bytes accepted so far.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Whether the limit has been crossed.
    pub fn is_exceeded(&self) -> bool {
        self.exceeded.is_cancelled()
    }

    /// Completes once the limit has been crossed.
    pub async fn exceeded(&self) {
        self.exceeded.cancelled().await;
    }

    /// The error reported when the limit is crossed.
    pub fn limit_error(&self) -> Error {
        self.error(self.limit.unwrap_or_default())
    }

    fn error(&self, limit: u64) -> Error {
        Error::command(
            CommandReason::OutputLimitExceeded,
            format!("output exceeded {limit} bytes"),
        )
        .with_context("max_output_bytes", limit)
    }
}
