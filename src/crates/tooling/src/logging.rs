//! Timing instrumentation helpers
//!
//! Thin wrappers over `tracing` for measuring async operations. Used around
//! node handlers and bus handler dispatch.

use std::time::Instant;
use tracing::debug;

/// Run a future and log its wall-clock duration at debug level.
///
/// # Example
///
/// ```rust,ignore
/// use tooling::logging::timed;
///
/// let result = timed("node:classify", handler(state)).await;
/// ```
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    debug!(operation = name, "starting");

    let result = future.await;

    debug!(operation = name, elapsed = ?start.elapsed(), "completed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timed_returns_inner_value() {
        let value = timed("test", async { 7 }).await;
        assert_eq!(value, 7);
    }
}
