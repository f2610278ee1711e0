//! Bounded waits for calls into external collaborators.

use crate::error::{LifecycleError, Result};
use std::future::Future;
use std::time::Duration;

/// Run `operation` with an upper bound on how long it may take.
///
/// An elapsed timeout becomes [`LifecycleError::Timeout`], which callers treat
/// as a retryable failure of the single item being processed.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(
                target: "taxflow::timeout",
                operation,
                timeout_seconds = limit.as_secs(),
                "External call timed out"
            );
            Err(LifecycleError::Timeout {
                operation: operation.to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_through_result() {
        let value = with_timeout(Duration::from_secs(1), "noop", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_becomes_timeout_error() {
        let result: Result<()> = with_timeout(Duration::from_secs(2), "blob_store.delete", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match result {
            Err(LifecycleError::Timeout { operation, seconds }) => {
                assert_eq!(operation, "blob_store.delete");
                assert_eq!(seconds, 2);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
