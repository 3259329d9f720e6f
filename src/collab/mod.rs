//! External collaborator interfaces
//!
//! The engine consumes three narrow collaborators: a decision backend that
//! turns a turn brief into a proposed action, a doctrine retriever, and a
//! persistence layer for turn-boundary snapshots. Everything here degrades
//! gracefully; a collaborator outage never aborts a turn.

pub mod decision;
pub mod persistence;
pub mod retrieval;

pub use decision::{DecisionBackend, LlmDecisionBackend, ScriptedBackend};
pub use persistence::{load_snapshot, save_snapshot, Snapshot};
pub use retrieval::{DoctrineRetriever, DoctrineSnippet, HttpRetriever, StaticRetriever};

use crate::core::error::Result;
use std::future::Future;
use std::time::Duration;

/// Run a dependency call with bounded retries and doubling backoff.
///
/// Only dependency calls go through here; adjudication failures are handled
/// by negotiation and integrity errors must be fixed, not retried.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_backoff: Duration,
    what: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = base_backoff;
    let mut last_err = None;
    for attempt in 0..attempts.max(1) {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(dependency = what, attempt, error = %e, "dependency call failed");
                last_err = Some(e);
                if attempt + 1 < attempts.max(1) {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
    // attempts.max(1) guarantees at least one iteration ran
    Err(last_err.unwrap_or_else(|| {
        crate::core::error::EngineError::DecisionBackend("no attempts made".into())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::Retrieval("flaky".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_with_backoff(2, Duration::from_millis(1), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Retrieval("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
