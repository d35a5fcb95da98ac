//! Engine-level error types.
//!
//! Only faults of the engine itself are represented here. Problems caused by
//! the snippet (exceptions, syntax errors), by the interpreter (missing
//! binary, crash) or by the result channel (truncated payload) are reported
//! inside [`ExecutionResult::error`](crate::ExecutionResult::error) instead.

use crate::execution::ExecutionId;

/// Errors that can escape [`Engine::submit`](crate::Engine::submit).
///
/// Seeing one of these means something is wrong with the engine or with the
/// way it is being driven, not with the submitted snippet.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The instrumented script could not be assembled.
    #[error("failed to instrument snippet: {0}")]
    Instrumentation(String),

    /// An execution with this identifier is already in flight.
    #[error("execution {0} is already running")]
    DuplicateExecution(ExecutionId),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Instrumentation(err.to_string())
    }
}
