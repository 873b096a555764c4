//! Streaming tool-call extraction and dependency-aware execution for
//! LLM-driven coding agents.
//!
//! A model's streamed reply arrives as text chunks with JSON tool-call
//! payloads embedded mid-prose, split arbitrarily across chunk
//! boundaries. This crate turns that stream into settled executions:
//!
//! ```text
//!   text chunks ──▶ StreamExtractor ──▶ CallRequest ──▶ Scheduler ──▶ ExecutionRecord
//!                   (incremental JSON     (id, tool,     (DAG order,     (state, output,
//!                    scanning)            params, deps)   concurrency     error, attempts)
//!                                                         cap, cache,
//!                                                         retry, cancel)
//! ```
//!
//! The [`Scheduler`] executes each call once its dependencies have
//! succeeded, bounds in-flight executions with a FIFO-fair limiter,
//! serves repeated identical calls from a TTL [result cache], retries
//! transient failures, skips dependents of failed calls, and broadcasts
//! cancellation. [`ToolEngine`] wires an extractor and a scheduler
//! together for a conversation; tool implementations plug in behind the
//! [`ToolDispatcher`] trait (or [`dispatch_fn`] for closures).
//!
//! [result cache]: ResultCache
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use toolrun::{dispatch_fn, CallState, EngineConfig, ToolEngine, ToolError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dispatcher = dispatch_fn(|tool_name, params| {
//!     let reply = json!({ "tool": tool_name, "echo": params });
//!     async move { Ok::<_, ToolError>(reply) }
//! });
//!
//! let mut engine = ToolEngine::new(Arc::new(dispatcher), EngineConfig::default());
//!
//! // Chunks may split a payload anywhere; the extractor reassembles it.
//! engine.feed(r#"Reading the file now: {"tool": "read_file", "#);
//! engine.feed(r#""params": {"path": "src/lib.rs"}} — one moment."#);
//!
//! let records = engine.drain().await;
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].state, CallState::Succeeded);
//! # }
//! ```
//!
//! # Modules
//!
//! | Module      | Responsibility                                        |
//! |-------------|-------------------------------------------------------|
//! | [`extract`] | incremental payload recognition in streamed text      |
//! | [`scheduler`] | dependency ordering, dispatch, skip propagation     |
//! | [`cache`]   | TTL result cache with cancellable expiry timers       |
//! | [`limiter`] | bounded, FIFO-fair concurrent admission               |
//! | [`retry`]   | transient-vs-permanent failure classification         |
//! | [`dispatch`]| the tool implementation contract                      |
//! | [`engine`]  | per-conversation wiring of extractor and scheduler    |

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod extract;
pub mod key;
pub mod limiter;
pub mod request;
pub mod retry;
pub mod scheduler;

pub use cache::ResultCache;
pub use config::{EngineConfig, ExtractorConfig, SchedulerConfig};
pub use dispatch::{dispatch_fn, FnDispatcher, ToolDispatcher};
pub use engine::ToolEngine;
pub use error::{SubmitError, ToolError};
pub use extract::StreamExtractor;
pub use key::canonical_key;
pub use limiter::ConcurrencyLimiter;
pub use request::{CallRequest, CallState, ExecutionRecord};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::Scheduler;
