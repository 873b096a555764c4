//! Extractor-to-scheduler wiring for a conversation.
//!
//! [`ToolEngine`] owns one [`StreamExtractor`] and one [`Scheduler`] and
//! connects them: text chunks go in, extracted calls are submitted for
//! execution as they complete, and [`drain`](ToolEngine::drain) returns
//! the turn's records. The surrounding application drives the
//! conversation loop (prompting the model, bounding turns with
//! [`max_turns`](ToolEngine::max_turns)); the engine handles everything
//! between a chunk of model output and a set of settled executions.
//!
//! ```text
//!   model text ──▶ feed() ──▶ StreamExtractor ──▶ submit() ──▶ Scheduler
//!                                                                 │
//!   records ◀──────────────────────── drain() ◀───────────────────┘
//! ```

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::dispatch::ToolDispatcher;
use crate::extract::StreamExtractor;
use crate::request::ExecutionRecord;
use crate::scheduler::Scheduler;

/// One conversation's extraction and execution state.
///
/// Turn lifecycle: [`feed`](Self::feed) any number of chunks, await
/// [`drain`](Self::drain), hand the records back to the model, then
/// [`finish_turn`](Self::finish_turn) before feeding the next response.
/// The result cache lives inside the scheduler and persists across turns
/// within its TTL; extractor budgets reset each turn.
#[derive(Debug)]
pub struct ToolEngine {
    extractor: StreamExtractor,
    scheduler: Scheduler,
    max_turns: u32,
}

impl ToolEngine {
    /// Creates an engine that executes calls through `dispatcher`.
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>, config: EngineConfig) -> Self {
        Self {
            extractor: StreamExtractor::new(config.extractor),
            scheduler: Scheduler::new(dispatcher, config.scheduler),
            max_turns: config.max_turns,
        }
    }

    /// Feeds one chunk of model output, submitting every call it
    /// completes. Returns the number of calls accepted for execution.
    ///
    /// Execution begins immediately for accepted calls that are ready;
    /// nothing waits for [`drain`](Self::drain), so this must be called
    /// from within a tokio runtime. A request the scheduler rejects
    /// (duplicate id, bad dependency) is logged and dropped — the stream
    /// keeps flowing, and the model learns of the gap from the turn's
    /// records.
    pub fn feed(&mut self, chunk: &str) -> usize {
        let mut accepted = 0;
        for request in self.extractor.feed(chunk) {
            let id = request.id.clone();
            match self.scheduler.submit(request) {
                Ok(()) => accepted += 1,
                Err(error) => {
                    tracing::warn!(id = %id, error = %error, "dropping extracted call");
                }
            }
        }
        accepted
    }

    /// Waits for every in-flight call to settle and returns the turn's
    /// records in submission order.
    pub async fn drain(&mut self) -> Vec<ExecutionRecord> {
        self.scheduler.drain().await
    }

    /// Cancels the conversation: pending calls are marked `Cancelled`,
    /// running calls are signalled, cache timers are aborted.
    pub fn cancel(&mut self) {
        self.scheduler.cancel();
    }

    /// Resets the extractor for the next turn. Call after
    /// [`drain`](Self::drain); the result cache is left intact.
    pub fn finish_turn(&mut self) {
        self.extractor.reset();
    }

    /// The configured turn bound, for the conversation driver.
    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Read access to the extractor, e.g. to check
    /// [`is_exhausted`](StreamExtractor::is_exhausted).
    pub fn extractor(&self) -> &StreamExtractor {
        &self.extractor
    }

    /// Read access to the scheduler, e.g. for
    /// [`cancellation_token`](Scheduler::cancellation_token).
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::ExtractorConfig;
    use crate::dispatch::dispatch_fn;
    use crate::request::CallState;

    fn engine() -> ToolEngine {
        let dispatcher = dispatch_fn(|tool_name, _| {
            let reply = json!({"ran": tool_name});
            async move { Ok(reply) }
        });
        ToolEngine::new(Arc::new(dispatcher), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_feed_extracts_and_executes() {
        let mut engine = engine();
        let accepted = engine.feed(
            r#"Let me check. {"tool": "read_file", "params": {"path": "a.rs"}} Done."#,
        );
        assert_eq!(accepted, 1);

        let records = engine.drain().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, CallState::Succeeded);
        assert_eq!(records[0].output.as_ref().unwrap()["ran"], "read_file");
    }

    #[tokio::test]
    async fn test_duplicate_id_dropped_not_fatal() {
        let mut engine = engine();
        engine.feed(r#"{"id": "x", "tool": "a", "params": {}}"#);
        let accepted = engine.feed(r#"{"id": "x", "tool": "b", "params": {}}"#);
        assert_eq!(accepted, 0);

        let records = engine.drain().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request.tool_name, "a");
    }

    #[tokio::test]
    async fn test_finish_turn_resets_extractor_budgets() {
        let dispatcher = dispatch_fn(|_, _| async { Ok(json!(null)) });
        let mut engine = ToolEngine::new(
            Arc::new(dispatcher),
            EngineConfig {
                extractor: ExtractorConfig {
                    max_parse_attempts: 2,
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        engine.feed("{bad} {bad} {bad}");
        assert!(engine.extractor().is_exhausted());

        engine.drain().await;
        engine.finish_turn();
        assert!(!engine.extractor().is_exhausted());
        let accepted = engine.feed(r#"{"tool": "t", "params": {}}"#);
        assert_eq!(accepted, 1);
        engine.drain().await;
    }

    #[tokio::test]
    async fn test_cancel_via_engine() {
        let mut engine = engine();
        engine.cancel();
        engine.feed(r#"{"tool": "t", "params": {}}"#);
        let records = engine.drain().await;
        assert_eq!(records[0].state, CallState::Cancelled);
    }

    #[test]
    fn test_max_turns_exposed() {
        let dispatcher = dispatch_fn(|_, _| async { Ok(json!(null)) });
        let engine = ToolEngine::new(Arc::new(dispatcher), EngineConfig::default());
        assert_eq!(engine.max_turns(), 10);
    }
}
