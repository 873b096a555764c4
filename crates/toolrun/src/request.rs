//! Call requests, call states, and execution records.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;

/// A structured instruction to invoke one named tool with a parameter
/// mapping.
///
/// Immutable once submitted. Ids are unique within a conversation turn;
/// `depends_on` may only name calls submitted earlier in the same turn.
/// Requests are built by the [`StreamExtractor`](crate::StreamExtractor)
/// from payloads embedded in the model's output, or constructed directly
/// by a caller.
///
/// The serde representation matches the wire payload the extractor
/// recognizes:
///
/// ```json
/// {"id": "fmt", "tool": "shell", "params": {"cmd": "cargo fmt"}, "depends_on": []}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    /// Unique id for this call within the turn.
    pub id: String,

    /// Name of the tool to invoke.
    #[serde(rename = "tool")]
    pub tool_name: String,

    /// Parameter mapping passed to the tool.
    pub params: Map<String, Value>,

    /// Ids of calls that must reach a terminal state before this one runs.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl CallRequest {
    /// Creates a request with no dependencies.
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            params,
            depends_on: Vec::new(),
        }
    }

    /// Adds dependency ids to the request.
    #[must_use]
    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }
}

/// Lifecycle state of a submitted call.
///
/// Owned exclusively by the scheduler; transitions are the only mutation
/// path. `Succeeded`, `Failed`, `Skipped`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Accepted, waiting for dependencies to settle.
    Queued,
    /// All dependencies succeeded; waiting for a concurrency slot.
    Ready,
    /// Dispatched and executing.
    Running,
    /// Finished with a result (executed or cache hit).
    Succeeded,
    /// Finished with a permanent error.
    Failed,
    /// Never ran: a dependency failed, was skipped, or was cancelled.
    Skipped,
    /// Never ran or was interrupted by the cancellation signal.
    Cancelled,
}

impl CallState {
    /// Returns `true` for the four terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

/// The scheduler's record of one submitted call.
///
/// Created when a request is accepted, mutated only by the scheduling
/// loop, and returned (in submission order) by
/// [`drain`](crate::Scheduler::drain) at the end of the turn. Records do
/// not persist across turns.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// The request as submitted.
    pub request: CallRequest,
    /// Current lifecycle state.
    pub state: CallState,
    /// Number of execution attempts made (0 until first dispatch settles).
    pub attempts: u32,
    /// The result value, present once `Succeeded`.
    pub output: Option<Value>,
    /// The most recent execution error, present on `Failed`/`Cancelled`
    /// (and transiently between retry attempts).
    pub error: Option<ToolError>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) finished_at: Option<Instant>,
}

impl ExecutionRecord {
    pub(crate) fn new(request: CallRequest) -> Self {
        Self {
            request,
            state: CallState::Queued,
            attempts: 0,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock time from first dispatch to settlement, across all
    /// attempts. `None` until the call has both started and finished;
    /// skipped and pre-dispatch cancelled calls never start.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }
}
