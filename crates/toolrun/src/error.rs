//! Error types for submission and execution.
//!
//! Two concerns, two types. [`SubmitError`] is returned synchronously from
//! [`Scheduler::submit`](crate::Scheduler::submit) when a request is
//! structurally invalid — the caller must handle it immediately. [`ToolError`]
//! is what a tool invocation produces when it fails; it is recorded on the
//! [`ExecutionRecord`](crate::ExecutionRecord) and surfaced through
//! [`drain`](crate::Scheduler::drain), never thrown.
//!
//! Extractor parse failures are deliberately *not* an error type: malformed
//! payload candidates in the model's text stream are transient input noise,
//! counted and bounded inside the extractor and reported through
//! [`StreamExtractor::is_exhausted`](crate::StreamExtractor::is_exhausted).
//!
//! # Retryability
//!
//! [`ToolError`] variants carry a transient-vs-permanent classification that
//! the retry policy consults:
//!
//! ```rust
//! use toolrun::ToolError;
//!
//! let err = ToolError::Timeout { elapsed_ms: 5000 };
//! assert!(err.is_retryable());
//!
//! let err = ToolError::Cancelled;
//! assert!(!err.is_retryable());
//! ```

/// A failure produced by a tool invocation.
///
/// Variants are `#[non_exhaustive]` — new failure kinds may be added in
/// minor releases without breaking downstream matches.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// The tool implementation returned a failure.
    #[error("tool execution failed: {message}")]
    Execution {
        /// Human-readable error description.
        message: String,
        /// Whether the failure is transient and worth retrying.
        retryable: bool,
    },

    /// The invocation exceeded its execution deadline.
    ///
    /// Always classified transient for retry purposes.
    #[error("tool timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the deadline fired.
        elapsed_ms: u64,
    },

    /// The invocation observed the cancellation signal.
    ///
    /// Terminal: never retried.
    #[error("tool execution cancelled")]
    Cancelled,
}

impl ToolError {
    /// Creates a permanent execution failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a transient execution failure, eligible for retry.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns `true` if the failure is transient and the call may succeed
    /// on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Execution { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            Self::Cancelled => false,
        }
    }
}

/// A synchronous rejection from [`Scheduler::submit`](crate::Scheduler::submit).
///
/// Dependencies may only name calls submitted earlier in the same turn, so
/// forward references — and therefore cycles — all surface as
/// [`UnknownDependency`](Self::UnknownDependency).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// A call with this id was already submitted this turn.
    #[error("duplicate call id: {id}")]
    DuplicateId {
        /// The conflicting id.
        id: String,
    },

    /// The request names a dependency that has not been submitted.
    #[error("call {id} depends on unknown call {dependency}")]
    UnknownDependency {
        /// The id of the rejected request.
        id: String,
        /// The dependency id that was not found.
        dependency: String,
    },

    /// The request lists itself in its own dependency set.
    #[error("call {id} depends on itself")]
    SelfDependency {
        /// The id of the rejected request.
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_retryable_flag() {
        assert!(!ToolError::failed("boom").is_retryable());
        assert!(ToolError::transient("busy").is_retryable());
    }

    #[test]
    fn test_timeout_always_retryable() {
        assert!(ToolError::Timeout { elapsed_ms: 100 }.is_retryable());
    }

    #[test]
    fn test_cancelled_never_retryable() {
        assert!(!ToolError::Cancelled.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ToolError::failed("disk full");
        assert!(format!("{err}").contains("disk full"));

        let err = ToolError::Timeout { elapsed_ms: 5000 };
        assert!(format!("{err}").contains("5000"));
    }

    #[test]
    fn test_submit_error_display() {
        let err = SubmitError::UnknownDependency {
            id: "b".into(),
            dependency: "a".into(),
        };
        let display = format!("{err}");
        assert!(display.contains('b'));
        assert!(display.contains('a'));
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ToolError>();
        assert_send_sync::<SubmitError>();
    }
}
