//! Bounded admission for concurrent tool executions.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A counting admission gate bounding how many tool executions may be
/// simultaneously in flight.
///
/// Backed by a [`tokio::sync::Semaphore`], whose FIFO wake order gives the
/// fairness the scheduler needs: no waiting call starves while slots turn
/// over. The scheduler uses the non-blocking [`try_acquire`](Self::try_acquire)
/// path and relies on completion events (which release permits) to trigger
/// re-dispatch, so its decision loop never blocks on admission.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    budget: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with the given slot budget. Budgets below 1 are
    /// clamped to 1.
    pub fn new(budget: usize) -> Self {
        let budget = budget.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(budget)),
            budget,
        }
    }

    /// Takes a slot if one is free, without waiting.
    ///
    /// The slot is released when the returned permit is dropped.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    /// Waits for a slot. Admission order is FIFO.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed, so acquisition cannot fail.
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("limiter semaphore closed")
    }

    /// The configured slot budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
