//! Retry decisions for failed executions.

use crate::error::ToolError;

/// What the scheduler should do with a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue the call for another attempt.
    Retry,
    /// Transition the call to `Failed` permanently.
    Fail,
}

/// Classifies failed executions as retryable or permanent.
///
/// A call is retried when its error is transient
/// ([`ToolError::is_retryable`]) and its attempt budget is not exhausted.
/// Cancellation is terminal and never retried. The scheduler re-queues a
/// retrying call through its ready set rather than sleeping, so retries
/// are dispatched as soon as a slot is free.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum retries after the first attempt; a call makes at most
    /// `max_retries + 1` attempts total.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` retries per call.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Decides the fate of a call whose latest attempt failed with
    /// `error`, where `attempts` attempts have been made so far.
    pub fn decide(&self, error: &ToolError, attempts: u32) -> RetryDecision {
        if error.is_retryable() && attempts <= self.max_retries {
            RetryDecision::Retry
        } else {
            RetryDecision::Fail
        }
    }
}
