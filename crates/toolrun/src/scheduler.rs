//! Dependency-ordered scheduling of tool executions.
//!
//! The [`Scheduler`] accepts a growing set of call requests with declared
//! dependencies, decides readiness, dispatches ready calls under the
//! concurrency budget, consults the result cache, applies the retry
//! policy, and propagates skips through dependents.
//!
//! # Decision loop
//!
//! All `ExecutionRecord` mutation happens inside `&mut self` methods — the
//! decision loop is logically single-threaded. Dispatched executions run
//! as spawned tasks and report through a fan-in completion channel; when
//! nothing is ready and something is running, [`drain`](Scheduler::drain)
//! waits on the next completion event, never on a timer.
//!
//! # State machine
//!
//! ```text
//!   Queued ──(deps succeeded)──▶ Ready ──(slot acquired)──▶ Running ──▶ Succeeded
//!     │                            │                           │    └─▶ Failed ──▶ dependents Skipped
//!     │                            │                           └──────▶ Cancelled
//!     └──(dep failed/skipped/cancelled)──▶ Skipped
//! ```
//!
//! Skip propagation is computed lazily at readiness-check time. Because a
//! dependency always precedes its dependents in submission order, one
//! in-order pass over the queued set settles whole downstream chains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::config::SchedulerConfig;
use crate::dispatch::ToolDispatcher;
use crate::error::{SubmitError, ToolError};
use crate::key::canonical_key;
use crate::limiter::ConcurrencyLimiter;
use crate::request::{CallRequest, CallState, ExecutionRecord};
use crate::retry::{RetryDecision, RetryPolicy};

/// One finished execution attempt, reported by its task.
struct Completion {
    id: String,
    outcome: Result<Value, ToolError>,
}

/// Fate of a `Queued` call at readiness-check time.
enum Readiness {
    /// Some dependency is still in flight.
    Wait,
    /// Every dependency succeeded.
    Ready,
    /// A dependency failed, was skipped, or was cancelled.
    Skip,
}

/// Schedules extracted call requests against their dependency graph.
///
/// Turn-scoped: [`drain`](Self::drain) returns and clears the turn's
/// records. The result cache outlives turns (within its TTL). Cancellation
/// is sticky — a cancelled scheduler accepts no further work; the
/// conversation is over.
pub struct Scheduler {
    dispatcher: Arc<dyn ToolDispatcher>,
    records: Vec<ExecutionRecord>,
    index: HashMap<String, usize>,
    cache: ResultCache,
    limiter: ConcurrencyLimiter,
    retry: RetryPolicy,
    tool_timeout: Option<Duration>,
    cancel: CancellationToken,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    running: usize,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("records", &self.records.len())
            .field("running", &self.running)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler that executes calls through `dispatcher`.
    pub fn new(dispatcher: Arc<dyn ToolDispatcher>, config: SchedulerConfig) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            dispatcher,
            records: Vec::new(),
            index: HashMap::new(),
            cache: ResultCache::new(config.cache_ttl),
            limiter: ConcurrencyLimiter::new(config.max_concurrency),
            retry: RetryPolicy::new(config.max_retries),
            tool_timeout: config.tool_timeout,
            cancel: CancellationToken::new(),
            completions_tx,
            completions_rx,
            running: 0,
        }
    }

    /// Accepts a call request, or rejects it synchronously.
    ///
    /// Dependencies must name calls submitted earlier this turn, so cycles
    /// cannot form. Accepted calls are dispatched immediately when ready
    /// and a slot is free; callers need not wait for [`drain`](Self::drain)
    /// for work to start. Must be called from within a tokio runtime
    /// (dispatch spawns the execution task).
    pub fn submit(&mut self, request: CallRequest) -> Result<(), SubmitError> {
        if self.index.contains_key(&request.id) {
            return Err(SubmitError::DuplicateId {
                id: request.id,
            });
        }
        for dependency in &request.depends_on {
            if *dependency == request.id {
                return Err(SubmitError::SelfDependency {
                    id: request.id,
                });
            }
            if !self.index.contains_key(dependency) {
                return Err(SubmitError::UnknownDependency {
                    id: request.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        tracing::debug!(id = %request.id, tool = %request.tool_name, "call accepted");
        self.index.insert(request.id.clone(), self.records.len());
        self.records.push(ExecutionRecord::new(request));
        self.pump();
        Ok(())
    }

    /// Runs the turn to completion: blocks until no call is queued, ready,
    /// or running, then returns all records in submission order and clears
    /// them.
    pub async fn drain(&mut self) -> Vec<ExecutionRecord> {
        let cancel = self.cancel.clone();
        let mut cancel_observed = cancel.is_cancelled();
        loop {
            self.pump();
            if self.records.iter().all(|r| r.state.is_terminal()) {
                break;
            }
            // Non-terminal calls either run, wait on a runner's slot, or
            // wait on a runner's completion — something must be running.
            debug_assert!(self.running > 0, "active calls but nothing running");

            tokio::select! {
                biased;
                () = cancel.cancelled(), if !cancel_observed => {
                    // Next pump transitions pending calls to Cancelled;
                    // running calls settle through the channel.
                    cancel_observed = true;
                }
                completion = self.completions_rx.recv() => match completion {
                    Some(completion) => self.settle(completion),
                    None => break,
                },
            }
        }

        if self.cancel.is_cancelled() {
            self.cache.shutdown();
        }
        self.index.clear();
        std::mem::take(&mut self.records)
    }

    /// Broadcasts cancellation to every running execution and the decision
    /// loop.
    ///
    /// Returns after every pending (not yet running) call is `Cancelled`
    /// and every outstanding cache expiry timer is cancelled. Calls that
    /// are mid-execution settle as `Cancelled` (or `Failed`) when they
    /// observe the signal; no call enters `Running` after this returns.
    pub fn cancel(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::debug!("cancelling conversation");
        self.cancel.cancel();
        self.pump();
        self.cache.shutdown();
    }

    /// A handle on the cancellation signal, for callers that need to
    /// cancel while [`drain`](Self::drain) is pending.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the scheduler was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Decision loop ───────────────────────────────────────────────

    /// One non-blocking scheduling pass: absorb arrived completions, then
    /// alternate readiness and dispatch until nothing transitions.
    fn pump(&mut self) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.settle(completion);
        }
        loop {
            let transitions = self.advance_queued() + self.dispatch_ready();
            if transitions == 0 {
                break;
            }
        }
    }

    fn readiness(&self, i: usize) -> Readiness {
        let mut ready = true;
        for dependency in &self.records[i].request.depends_on {
            // Validated at submission; a missing entry would be a bug.
            let Some(&dep_index) = self.index.get(dependency) else {
                return Readiness::Skip;
            };
            match self.records[dep_index].state {
                CallState::Succeeded => {}
                CallState::Failed | CallState::Skipped | CallState::Cancelled => {
                    return Readiness::Skip;
                }
                CallState::Queued | CallState::Ready | CallState::Running => ready = false,
            }
        }
        if ready {
            Readiness::Ready
        } else {
            Readiness::Wait
        }
    }

    /// Applies `Skipped`/`Ready`/`Cancelled` transitions to queued calls.
    fn advance_queued(&mut self) -> usize {
        let mut transitions = 0;
        let cancelled = self.cancel.is_cancelled();
        for i in 0..self.records.len() {
            if self.records[i].state != CallState::Queued {
                continue;
            }
            if cancelled {
                let record = &mut self.records[i];
                record.state = CallState::Cancelled;
                record.finished_at = Some(Instant::now());
                transitions += 1;
                continue;
            }
            match self.readiness(i) {
                Readiness::Wait => {}
                Readiness::Ready => {
                    self.records[i].state = CallState::Ready;
                    transitions += 1;
                }
                Readiness::Skip => {
                    let record = &mut self.records[i];
                    record.state = CallState::Skipped;
                    record.finished_at = Some(Instant::now());
                    tracing::debug!(id = %record.request.id, "skipped: dependency did not succeed");
                    transitions += 1;
                }
            }
        }
        transitions
    }

    /// Dispatches ready calls up to the limiter's remaining budget,
    /// checking the cache first.
    fn dispatch_ready(&mut self) -> usize {
        let mut transitions = 0;
        if self.cancel.is_cancelled() {
            for record in &mut self.records {
                if record.state == CallState::Ready {
                    record.state = CallState::Cancelled;
                    record.finished_at = Some(Instant::now());
                    transitions += 1;
                }
            }
            return transitions;
        }

        for i in 0..self.records.len() {
            if self.records[i].state != CallState::Ready {
                continue;
            }

            let key = canonical_key(
                &self.records[i].request.tool_name,
                &self.records[i].request.params,
            );
            if let Some(value) = self.cache.get(&key) {
                // A hit succeeds without executing and without a new timer.
                let now = Instant::now();
                let record = &mut self.records[i];
                record.state = CallState::Succeeded;
                record.output = Some(value);
                record.error = None;
                record.started_at = Some(now);
                record.finished_at = Some(now);
                tracing::debug!(id = %record.request.id, "cache hit");
                transitions += 1;
                continue;
            }

            // FIFO admission: once a slot is refused, later calls wait too.
            let Some(permit) = self.limiter.try_acquire() else {
                break;
            };
            self.spawn_execution(i, permit);
            transitions += 1;
        }
        transitions
    }

    fn spawn_execution(&mut self, i: usize, permit: tokio::sync::OwnedSemaphorePermit) {
        let record = &mut self.records[i];
        record.state = CallState::Running;
        if record.started_at.is_none() {
            record.started_at = Some(Instant::now());
        }
        let request = record.request.clone();
        let attempt = record.attempts + 1;
        self.running += 1;

        let dispatcher = Arc::clone(&self.dispatcher);
        let completions = self.completions_tx.clone();
        let cancel = self.cancel.child_token();
        let deadline = self.tool_timeout;

        tracing::debug!(id = %request.id, tool = %request.tool_name, attempt, "dispatching");
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = run_tool(&dispatcher, &request, &cancel, deadline).await;
            let _ = completions.send(Completion {
                id: request.id,
                outcome,
            });
            // The permit and the child cancellation token drop here: the
            // slot is released and the listener deregistered on every
            // settlement path alike.
        });
    }

    /// Records the outcome of a finished execution attempt.
    fn settle(&mut self, completion: Completion) {
        let Some(&i) = self.index.get(&completion.id) else {
            return;
        };
        if self.records[i].state != CallState::Running {
            return;
        }
        self.running -= 1;
        self.records[i].attempts += 1;

        // A success that raced the cancellation signal does not count.
        let outcome = if self.cancel.is_cancelled() {
            completion.outcome.and_then(|_| Err(ToolError::Cancelled))
        } else {
            completion.outcome
        };

        let now = Instant::now();
        match outcome {
            Ok(value) => {
                // Fresh successes are the only cache writes — never hits,
                // never skips.
                let key = canonical_key(
                    &self.records[i].request.tool_name,
                    &self.records[i].request.params,
                );
                self.cache.insert(&key, value.clone());

                let record = &mut self.records[i];
                record.state = CallState::Succeeded;
                record.output = Some(value);
                record.error = None;
                record.finished_at = Some(now);
            }
            Err(ToolError::Cancelled) => {
                let record = &mut self.records[i];
                record.state = CallState::Cancelled;
                record.error = Some(ToolError::Cancelled);
                record.finished_at = Some(now);
            }
            Err(error) => {
                let attempts = self.records[i].attempts;
                let record = &mut self.records[i];
                match self.retry.decide(&error, attempts) {
                    RetryDecision::Retry => {
                        tracing::debug!(
                            id = %record.request.id,
                            attempts,
                            error = %error,
                            "transient failure, requeueing"
                        );
                        record.error = Some(error);
                        // Dependencies already satisfied: ready next pass.
                        record.state = CallState::Queued;
                    }
                    RetryDecision::Fail => {
                        tracing::debug!(
                            id = %record.request.id,
                            attempts,
                            error = %error,
                            "permanent failure"
                        );
                        record.error = Some(error);
                        record.state = CallState::Failed;
                        record.finished_at = Some(now);
                    }
                }
            }
        }
    }
}

/// One invocation attempt: races the tool (under its deadline, if any)
/// against the cancellation signal, and contains panics.
async fn run_tool(
    dispatcher: &Arc<dyn ToolDispatcher>,
    request: &CallRequest,
    cancel: &CancellationToken,
    deadline: Option<Duration>,
) -> Result<Value, ToolError> {
    // invoke() runs inside the guarded block: a dispatcher that panics
    // while *constructing* its future must still settle as a completion,
    // or the call would stay Running forever.
    let guarded = async {
        let invoke = dispatcher.invoke(&request.tool_name, &request.params, cancel.clone());
        match deadline {
            Some(limit) => match tokio::time::timeout(limit, invoke).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout {
                    elapsed_ms: limit.as_millis().try_into().unwrap_or(u64::MAX),
                }),
            },
            None => invoke.await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ToolError::Cancelled),
        result = std::panic::AssertUnwindSafe(guarded).catch_unwind() => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::failed(format!(
                "tool {} panicked",
                request.tool_name
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    use crate::dispatch::dispatch_fn;

    fn params(value: Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn echo_scheduler(config: SchedulerConfig) -> Scheduler {
        let dispatcher = dispatch_fn(|tool_name, params| {
            let reply = json!({"tool": tool_name, "params": params});
            async move { Ok(reply) }
        });
        Scheduler::new(Arc::new(dispatcher), config)
    }

    #[tokio::test]
    async fn test_submit_and_drain_single_call() {
        let mut scheduler = echo_scheduler(SchedulerConfig::default());
        scheduler
            .submit(CallRequest::new("a", "echo", params(json!({"x": 1}))))
            .unwrap();

        let records = scheduler.drain().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, CallState::Succeeded);
        assert_eq!(records[0].attempts, 1);
        assert!(records[0].duration().is_some());
        assert_eq!(records[0].output.as_ref().unwrap()["tool"], "echo");
    }

    #[tokio::test]
    async fn test_drain_clears_records() {
        let mut scheduler = echo_scheduler(SchedulerConfig::default());
        scheduler
            .submit(CallRequest::new("a", "echo", Map::new()))
            .unwrap();
        let first = scheduler.drain().await;
        assert_eq!(first.len(), 1);
        let second = scheduler.drain().await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let mut scheduler = echo_scheduler(SchedulerConfig::default());
        scheduler
            .submit(CallRequest::new("a", "echo", Map::new()))
            .unwrap();
        let err = scheduler
            .submit(CallRequest::new("a", "echo", Map::new()))
            .unwrap_err();
        assert_eq!(err, SubmitError::DuplicateId { id: "a".into() });
        scheduler.drain().await;
    }

    #[tokio::test]
    async fn test_forward_reference_rejected() {
        let mut scheduler = echo_scheduler(SchedulerConfig::default());
        let err = scheduler
            .submit(CallRequest::new("b", "echo", Map::new()).with_deps(["a"]))
            .unwrap_err();
        assert_eq!(
            err,
            SubmitError::UnknownDependency {
                id: "b".into(),
                dependency: "a".into()
            }
        );
    }

    #[tokio::test]
    async fn test_self_dependency_rejected() {
        let mut scheduler = echo_scheduler(SchedulerConfig::default());
        let err = scheduler
            .submit(CallRequest::new("a", "echo", Map::new()).with_deps(["a"]))
            .unwrap_err();
        assert_eq!(err, SubmitError::SelfDependency { id: "a".into() });
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_transitively() {
        let dispatcher = dispatch_fn(|tool_name, _| {
            let fail = tool_name == "broken";
            async move {
                if fail {
                    Err(ToolError::failed("boom"))
                } else {
                    Ok(json!("ok"))
                }
            }
        });
        let mut scheduler = Scheduler::new(Arc::new(dispatcher), SchedulerConfig::default());

        scheduler
            .submit(CallRequest::new("a", "broken", Map::new()))
            .unwrap();
        scheduler
            .submit(CallRequest::new("b", "echo", Map::new()).with_deps(["a"]))
            .unwrap();
        scheduler
            .submit(CallRequest::new("c", "echo", Map::new()).with_deps(["b"]))
            .unwrap();

        let records = scheduler.drain().await;
        assert_eq!(records[0].state, CallState::Failed);
        assert_eq!(records[1].state, CallState::Skipped);
        assert_eq!(records[2].state, CallState::Skipped);
        // Skipped calls never ran.
        assert!(records[1].duration().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_retries_to_success() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let dispatcher = dispatch_fn(move |_, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ToolError::transient("busy"))
                } else {
                    Ok(json!("ok"))
                }
            }
        });
        let mut scheduler = Scheduler::new(
            Arc::new(dispatcher),
            SchedulerConfig {
                max_retries: 2,
                ..Default::default()
            },
        );
        scheduler
            .submit(CallRequest::new("a", "flaky", Map::new()))
            .unwrap();

        let records = scheduler.drain().await;
        assert_eq!(records[0].state, CallState::Succeeded);
        assert_eq!(records[0].attempts, 3);
        assert!(records[0].error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_fails() {
        let dispatcher = dispatch_fn(|_, _| async { Err(ToolError::transient("busy")) });
        let mut scheduler = Scheduler::new(
            Arc::new(dispatcher),
            SchedulerConfig {
                max_retries: 1,
                ..Default::default()
            },
        );
        scheduler
            .submit(CallRequest::new("a", "flaky", Map::new()))
            .unwrap();

        let records = scheduler.drain().await;
        assert_eq!(records[0].state, CallState::Failed);
        assert_eq!(records[0].attempts, 2);
        assert!(matches!(
            records[0].error,
            Some(ToolError::Execution { .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_execution() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let dispatcher = dispatch_fn(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!("computed")) }
        });
        let mut scheduler = Scheduler::new(Arc::new(dispatcher), SchedulerConfig::default());

        let same = params(json!({"path": "x"}));
        scheduler
            .submit(CallRequest::new("a", "read", same.clone()))
            .unwrap();
        scheduler
            .submit(CallRequest::new("b", "read", same).with_deps(["a"]))
            .unwrap();

        let records = scheduler.drain().await;
        assert_eq!(records[0].state, CallState::Succeeded);
        assert_eq!(records[1].state, CallState::Succeeded);
        assert_eq!(records[1].output, records[0].output);
        // The tool ran exactly once; the second call hit the cache.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(records[1].attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_classified_transient_then_fails() {
        let dispatcher = dispatch_fn(|_, _| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!("too late"))
        });
        let mut scheduler = Scheduler::new(
            Arc::new(dispatcher),
            SchedulerConfig {
                tool_timeout: Some(Duration::from_millis(50)),
                max_retries: 1,
                ..Default::default()
            },
        );
        scheduler
            .submit(CallRequest::new("a", "slow", Map::new()))
            .unwrap();

        let records = scheduler.drain().await;
        assert_eq!(records[0].state, CallState::Failed);
        assert_eq!(records[0].attempts, 2);
        assert!(matches!(records[0].error, Some(ToolError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancel_before_drain_marks_pending_cancelled() {
        let mut scheduler = echo_scheduler(SchedulerConfig::default());
        scheduler.cancel();
        scheduler
            .submit(CallRequest::new("a", "echo", Map::new()))
            .unwrap();

        let records = scheduler.drain().await;
        assert_eq!(records[0].state, CallState::Cancelled);
        // Never dispatched.
        assert!(records[0].duration().is_none());
        assert!(scheduler.is_cancelled());
    }

    #[tokio::test]
    async fn test_tool_panic_is_contained() {
        let dispatcher = dispatch_fn(|_, _| async { panic!("tool bug") });
        let mut scheduler = Scheduler::new(
            Arc::new(dispatcher),
            SchedulerConfig {
                max_retries: 0,
                ..Default::default()
            },
        );
        scheduler
            .submit(CallRequest::new("a", "buggy", Map::new()))
            .unwrap();

        let records = scheduler.drain().await;
        assert_eq!(records[0].state, CallState::Failed);
    }

    #[tokio::test]
    async fn test_panic_while_building_invocation_is_contained() {
        use std::future::Future;
        use std::pin::Pin;

        // Panics in invoke() itself, before any future exists.
        struct EagerUnwrapDispatcher;
        impl ToolDispatcher for EagerUnwrapDispatcher {
            fn invoke<'a>(
                &'a self,
                _tool_name: &'a str,
                params: &'a Map<String, Value>,
                _cancel: CancellationToken,
            ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
                let path = params.get("path").unwrap().clone();
                Box::pin(async move { Ok(path) })
            }
        }

        let mut scheduler = Scheduler::new(
            Arc::new(EagerUnwrapDispatcher),
            SchedulerConfig {
                max_retries: 0,
                ..Default::default()
            },
        );
        scheduler
            .submit(CallRequest::new("a", "read", Map::new()))
            .unwrap();
        scheduler
            .submit(CallRequest::new("b", "read", Map::new()).with_deps(["a"]))
            .unwrap();

        // Must settle rather than hang: the lost-completion path would
        // leave "a" Running and drain() waiting forever.
        let records = tokio::time::timeout(Duration::from_secs(5), scheduler.drain())
            .await
            .expect("drain must settle despite an invoke() panic");
        assert_eq!(records[0].state, CallState::Failed);
        assert_eq!(records[0].attempts, 1);
        assert_eq!(records[1].state, CallState::Skipped);
    }
}
