//! Deadline wrappers for async operations

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;

/// Execute an async operation with a deadline.
///
/// Distinguishes the operation's own failure from the deadline firing so the
/// caller can map each to its error taxonomy.
pub async fn with_timeout<F, T, E>(
    duration: Duration,
    operation: F,
) -> std::result::Result<T, TimeoutError<E>>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    match tokio_timeout(duration, operation).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(error)) => Err(TimeoutError::OperationFailed(error)),
        Err(_elapsed) => Err(TimeoutError::Timeout(duration)),
    }
}

/// Error type for deadline-wrapped operations.
#[derive(Debug)]
pub enum TimeoutError<E> {
    /// Operation completed but failed.
    OperationFailed(E),
    /// Operation did not complete before the deadline.
    Timeout(Duration),
}

impl<E: std::fmt::Display> std::fmt::Display for TimeoutError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutError::OperationFailed(e) => write!(f, "operation failed: {}", e),
            TimeoutError::Timeout(d) => write!(f, "operation timed out after {:?}", d),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TimeoutError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimeoutError::OperationFailed(e) => Some(e),
            TimeoutError::Timeout(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let result: Result<i32, TimeoutError<String>> =
            with_timeout(Duration::from_secs(1), async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_operation_failure_passes_through() {
        let result: Result<i32, TimeoutError<String>> =
            with_timeout(Duration::from_secs(1), async { Err("boom".to_string()) }).await;

        assert!(matches!(result, Err(TimeoutError::OperationFailed(ref e)) if e == "boom"));
    }

    #[tokio::test]
    async fn test_deadline_fires() {
        let result: Result<i32, TimeoutError<String>> =
            with_timeout(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(TimeoutError::Timeout(_))));
    }
}
