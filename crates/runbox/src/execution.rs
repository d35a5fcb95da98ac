//! Execution identifiers and the structured results handed back to callers.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque token identifying one in-flight run.
///
/// Used for cancellation, registry bookkeeping and to partition the
/// temporary-file namespace between concurrent executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form used in temp file names and log lines.
    #[must_use]
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ExecutionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// An inline probe annotation: evaluate `expression` and report its value
/// against source line `line` (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicComment {
    /// 1-based source line carrying the annotation.
    pub line: usize,
    /// Trimmed expression text.
    pub expression: String,
}

impl MagicComment {
    /// Create a probe for `expression` on `line`.
    #[must_use]
    pub fn new(line: usize, expression: impl Into<String>) -> Self {
        Self {
            line,
            expression: expression.into(),
        }
    }
}

/// Which output call produced a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Regular output (`console.log`, `print`, `echo`, `puts`, ...).
    #[serde(alias = "debug", alias = "trace")]
    Log,
    /// Warnings.
    #[serde(alias = "warning")]
    Warn,
    /// Error output (`console.error`, writes to stderr).
    Error,
    /// Informational output.
    Info,
}

/// One captured output call, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Kind of output call.
    pub kind: LogKind,
    /// Textual form of the call's arguments.
    pub text: String,
}

impl LogEntry {
    /// A plain `log` entry.
    #[must_use]
    pub fn log(text: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Log,
            text: text.into(),
        }
    }
}

/// Outcome of evaluating one [`MagicComment`] in the program's final scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Line the probe was attached to.
    pub line: usize,
    /// The probed expression.
    pub expression: String,
    /// JSON form of the value, or a placeholder string when the value could
    /// not be serialized. `None` when evaluation failed.
    #[serde(default)]
    pub value: Option<Value>,
    /// Error raised while evaluating the expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// A probe that never produced a value.
    #[must_use]
    pub fn unevaluated(comment: &MagicComment) -> Self {
        Self {
            line: comment.line,
            expression: comment.expression.clone(),
            value: None,
            error: Some("probe was not evaluated".to_string()),
        }
    }
}

/// Error raised by the snippet (or synthesized by the engine on its behalf).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// User-meaningful message.
    pub message: String,
    /// Stack trace or traceback, when the runtime provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ExecutionError {
    /// An error with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

/// Timing and exit information about a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStats {
    /// Wall-clock time from spawn to exit.
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Exit code of the interpreter, if it exited normally.
    pub exit_code: Option<i32>,
}

/// The terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Captured output calls, in the order they were produced.
    #[serde(default)]
    pub output: Vec<LogEntry>,
    /// Value of the snippet's trailing expression. Absent when the snippet
    /// yields none; a present JSON `null` is kept as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    /// Uncaught error, if any.
    #[serde(default)]
    pub error: Option<ExecutionError>,
    /// Probe results in source line order.
    #[serde(default)]
    pub probes: Vec<ProbeResult>,
    /// Run statistics, filled in by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ExecuteStats>,
}

impl ExecutionResult {
    /// A result carrying only an error.
    #[must_use]
    pub fn from_error(error: ExecutionError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Whether the run finished without an error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// What a submitted execution resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The run reached a terminal state and produced a result.
    Finished(ExecutionResult),
    /// The run was cancelled; any output it produced is discarded.
    Cancelled,
}

impl ExecutionOutcome {
    /// Whether the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The result, unless the run was cancelled.
    #[must_use]
    pub fn into_result(self) -> Option<ExecutionResult> {
        match self {
            Self::Finished(result) => Some(result),
            Self::Cancelled => None,
        }
    }
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn value_absent_and_null_are_distinct() {
        let absent: ExecutionResult =
            serde_json::from_str(r#"{"output":[],"error":null,"probes":[]}"#).expect("absent");
        assert_eq!(absent.value, None);

        let null: ExecutionResult =
            serde_json::from_str(r#"{"output":[],"value":null,"error":null,"probes":[]}"#)
                .expect("null");
        assert_eq!(null.value, Some(Value::Null));
    }

    #[test]
    fn absent_value_is_not_serialized() {
        let json = serde_json::to_value(ExecutionResult::default()).expect("serialize");
        assert!(json.get("value").is_none());
        assert_eq!(json["error"], Value::Null);
        assert_eq!(json["output"], serde_json::json!([]));
    }

    #[test]
    fn log_kind_accepts_aliases() {
        let entry: LogEntry =
            serde_json::from_str(r#"{"kind":"warning","text":"careful"}"#).expect("alias");
        assert_eq!(entry.kind, LogKind::Warn);
    }

    #[test]
    fn stats_serialize_as_millis() {
        let stats = ExecuteStats {
            duration: Duration::from_millis(1500),
            exit_code: Some(0),
        };
        let json = serde_json::to_value(&stats).expect("serialize");
        assert_eq!(json, serde_json::json!({"duration": 1500, "exitCode": 0}));
    }

    #[test]
    fn execution_id_parses_its_display_form() {
        let id = ExecutionId::new();
        let parsed: ExecutionId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
        assert_eq!(id.simple().len(), 32);
    }
}
