//! Bounded concurrent task execution.
//!
//! The [`TaskOrchestrator`] runs one future per work item with at most
//! `max_concurrent` in flight, admitting a new item only when another
//! completes. Results come back in input order as [`Outcome`]s.
//!
//! ## Cancellation
//!
//! ```text
//!  pending ──admit──▶ in flight ──complete──▶ Success / Failed / Panicked
//!     │                   │
//!     └── CancelToken ────┘ (in-flight items still finish)
//!     ▼
//!  Cancelled
//! ```
//!
//! Cancelling stops admission only. Work already started runs to completion,
//! bounded by its own per-call timeout, and its result is kept.

mod cancel;

pub use cancel::CancelToken;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, info, warn};

/// Terminal state of one work item.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T, E> {
    Success(T),
    Failed(E),
    /// The item's future panicked; carries the panic message.
    Panicked(String),
    /// The item was never admitted.
    Cancelled,
}

impl<T, E> Outcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Outcome<&T, &E> {
        match self {
            Self::Success(v) => Outcome::Success(v),
            Self::Failed(e) => Outcome::Failed(e),
            Self::Panicked(m) => Outcome::Panicked(m.clone()),
            Self::Cancelled => Outcome::Cancelled,
        }
    }
}

/// Tally of outcomes from one `run_all` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
    pub cancelled: usize,
}

impl OutcomeCounts {
    pub fn from_outcomes<T, E>(outcomes: &[Outcome<T, E>]) -> Self {
        outcomes.iter().fold(Self::default(), |mut acc, o| {
            match o {
                Outcome::Success(_) => acc.succeeded += 1,
                Outcome::Failed(_) => acc.failed += 1,
                Outcome::Panicked(_) => acc.panicked += 1,
                Outcome::Cancelled => acc.cancelled += 1,
            }
            acc
        })
    }
}

/// Bounded worker pool over a list of items.
#[derive(Debug, Clone, Copy)]
pub struct TaskOrchestrator {
    max_concurrent: usize,
}

impl TaskOrchestrator {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run `f` over every item. The result has one entry per item, at the
    /// item's position. No retries happen here.
    pub async fn run_all<I, T, E, F, Fut>(&self, items: Vec<I>, f: F, cancel: &CancelToken) -> Vec<Outcome<T, E>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total = items.len();
        let mut results: Vec<Option<Outcome<T, E>>> = (0..total).map(|_| None).collect();
        if total == 0 {
            return Vec::new();
        }

        let f = &f;
        let mut pending = items.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut admitting = true;

        loop {
            while admitting && in_flight.len() < self.max_concurrent {
                if cancel.is_cancelled() {
                    admitting = false;
                    break;
                }
                match pending.next() {
                    Some((index, item)) => {
                        let task = AssertUnwindSafe(async move { f(item).await }).catch_unwind();
                        in_flight.push(async move { (index, task.await) });
                    }
                    None => admitting = false,
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some((index, result)) = in_flight.next() => {
                    let outcome = match result {
                        Ok(Ok(value)) => Outcome::Success(value),
                        Ok(Err(error)) => Outcome::Failed(error),
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            warn!(index, %message, "task panicked");
                            Outcome::Panicked(message)
                        }
                    };
                    results[index] = Some(outcome);
                }
                _ = cancel.cancelled(), if admitting => {
                    info!(in_flight = in_flight.len(), "cancellation requested, draining in-flight tasks");
                    admitting = false;
                }
            }
        }

        let outcomes: Vec<_> = results
            .into_iter()
            .map(|o| o.unwrap_or(Outcome::Cancelled))
            .collect();

        let counts = OutcomeCounts::from_outcomes(&outcomes);
        debug!(
            total,
            succeeded = counts.succeeded,
            failed = counts.failed,
            panicked = counts.panicked,
            cancelled = counts.cancelled,
            "orchestrator run complete"
        );
        outcomes
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
