//! Shared helpers for bounded blocking work.

use std::time::Duration;

use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockingError {
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("blocking task failed: {0}")]
    Join(String),
}

impl From<BlockingError> for AuthError {
    fn from(err: BlockingError) -> Self {
        match err {
            BlockingError::TimedOut(_) => AuthError::Transient(err.to_string()),
            BlockingError::Join(msg) => AuthError::Internal(msg),
        }
    }
}

/// Runs `f` on the blocking pool and gives up after `limit`.
///
/// The task itself keeps running to completion if it times out; the caller just
/// stops waiting for it.
pub async fn run_blocking<T, F>(limit: Duration, f: F) -> Result<T, BlockingError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BlockingError::Join(e.to_string())),
        Err(_) => Err(BlockingError::TimedOut(limit)),
    }
}

/// Runs `f` on the blocking pool and waits for it to finish.
///
/// For work with side effects: once dispatched it may commit, so the caller must
/// see its real outcome. Any bound has to live inside `f`.
pub async fn run_to_completion<T, F>(f: F) -> Result<T, BlockingError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BlockingError::Join(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let value = run_blocking(Duration::from_secs(1), || 41 + 1).await;
        assert_eq!(value, Ok(42));
    }

    #[tokio::test]
    async fn test_run_blocking_times_out() {
        let result = run_blocking(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
        })
        .await;
        assert!(matches!(result, Err(BlockingError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_run_to_completion_outlasts_slow_work() {
        let value = run_to_completion(|| {
            std::thread::sleep(Duration::from_millis(50));
            "done"
        })
        .await;
        assert_eq!(value, Ok("done"));

        let result: Result<(), _> = run_to_completion(|| panic!("boom")).await;
        assert!(matches!(result, Err(BlockingError::Join(_))));
    }

    #[tokio::test]
    async fn test_run_blocking_reports_panics() {
        let result: Result<(), _> =
            run_blocking(Duration::from_secs(1), || panic!("boom")).await;
        assert!(matches!(result, Err(BlockingError::Join(_))));
    }
}
